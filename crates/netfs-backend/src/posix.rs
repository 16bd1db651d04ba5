//! POSIX passthrough backend.
//!
//! Each operation is the matching POSIX call on an already-sandboxed path.
//! Mode bits and `st_mode` type bits pass through untouched.

use std::fs::{self, DirBuilder, Metadata, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use netfs_proto::flags::{PERM_MASK, R_OK, S_IFMT, S_IFREG, W_OK, X_OK};
use netfs_proto::{
    DirListing, FileStat, FsError, FsOps, FsResult, HandleId, OpenFlags, StatVfs,
};
use rustix::fs::{Access, AtFlags, CWD, Timespec, Timestamps};

use crate::common;
use crate::handles::HandleRegistry;
use crate::{Backend, BackendKind};

/// Mode used by `open` when `O_CREAT` is set; the umask still applies.
const DEFAULT_CREATE_MODE: u32 = 0o666;

/// POSIX filesystem backend.
#[derive(Debug, Default)]
pub struct PosixBackend {
    handles: HandleRegistry,
}

impl PosixBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn stat(meta: &Metadata) -> FileStat {
        FileStat {
            st_atime: meta.atime() as f64 + meta.atime_nsec() as f64 / 1e9,
            st_ctime: meta.ctime() as f64 + meta.ctime_nsec() as f64 / 1e9,
            st_gid: meta.gid(),
            st_mode: meta.mode(),
            st_mtime: meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9,
            st_nlink: meta.nlink(),
            st_size: meta.size(),
            st_uid: meta.uid(),
        }
    }
}

/// Split a `SystemTime` into a normalised `timespec`.
fn timespec(time: SystemTime) -> Timespec {
    let (secs, nanos) = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, i64::from(d.subsec_nanos())),
        Err(e) => {
            let d = e.duration();
            let nanos = i64::from(d.subsec_nanos());
            if nanos == 0 {
                (-(d.as_secs() as i64), 0)
            } else {
                (-(d.as_secs() as i64) - 1, 1_000_000_000 - nanos)
            }
        }
    };
    Timespec {
        tv_sec: secs,
        tv_nsec: nanos as _,
    }
}

impl Backend for PosixBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Posix
    }

    fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    fn as_fs(&self) -> &dyn FsOps {
        self
    }
}

impl FsOps for PosixBackend {
    fn access(&self, path: &Path, mode: i32) -> FsResult<()> {
        let mut access = Access::EXISTS;
        if mode & R_OK != 0 {
            access |= Access::READ_OK;
        }
        if mode & W_OK != 0 {
            access |= Access::WRITE_OK;
        }
        if mode & X_OK != 0 {
            access |= Access::EXEC_OK;
        }
        rustix::fs::access(path, access).map_err(|e| FsError::from_io(e.into(), path))
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        fs::set_permissions(path, Permissions::from_mode(mode & PERM_MASK))
            .map_err(|e| FsError::from_io(e, path))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        std::os::unix::fs::chown(path, uid, gid).map_err(|e| FsError::from_io(e, path))
    }

    fn getattr(&self, path: &Path, fh: Option<HandleId>) -> FsResult<FileStat> {
        let meta = match fh {
            Some(fh) => self.handles.lookup(fh)?.with_file(|file| file.metadata())?,
            None => fs::symlink_metadata(path).map_err(|e| FsError::from_io(e, path))?,
        };
        Ok(Self::stat(&meta))
    }

    fn readdir(&self, path: &Path, _fh: HandleId) -> FsResult<DirListing> {
        common::list_dir(path)
    }

    fn readlink(&self, path: &Path) -> FsResult<String> {
        let target = fs::read_link(path).map_err(|e| FsError::from_io(e, path))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn statfs(&self, path: &Path) -> FsResult<StatVfs> {
        let stat = rustix::fs::statvfs(path).map_err(|e| FsError::from_io(e.into(), path))?;
        Ok(StatVfs {
            f_bavail: stat.f_bavail,
            f_bfree: stat.f_bfree,
            f_blocks: stat.f_blocks,
            f_bsize: stat.f_bsize,
            f_favail: stat.f_favail,
            f_ffree: stat.f_ffree,
            f_files: stat.f_files,
            f_flag: stat.f_flag.bits(),
            f_frsize: stat.f_frsize,
            f_namemax: stat.f_namemax,
        })
    }

    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> FsResult<()> {
        let (atime, mtime) = times.unwrap_or_else(|| {
            let now = SystemTime::now();
            (now, now)
        });
        let stamps = Timestamps {
            last_access: timespec(atime),
            last_modification: timespec(mtime),
        };
        rustix::fs::utimensat(CWD, path, &stamps, AtFlags::empty())
            .map_err(|e| FsError::from_io(e.into(), path))
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> FsResult<()> {
        let kind = mode & S_IFMT;
        if kind == 0 || kind == S_IFREG {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & PERM_MASK)
                .open(path)
                .map_err(|e| FsError::from_io(e, path))?;
            return Ok(());
        }
        mknod_special(path, mode, dev)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        DirBuilder::new()
            .mode(mode & PERM_MASK)
            .create(path)
            .map_err(|e| FsError::from_io(e, path))
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        fs::remove_dir(path).map_err(|e| FsError::from_io(e, path))
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        fs::remove_file(path).map_err(|e| FsError::from_io(e, path))
    }

    fn symlink(&self, name: &Path, target: &str) -> FsResult<()> {
        std::os::unix::fs::symlink(target, name).map_err(|e| FsError::from_io(e, name))
    }

    fn rename(&self, old: &Path, new: &Path) -> FsResult<()> {
        fs::rename(old, new).map_err(|e| FsError::from_io(e, old))
    }

    fn link(&self, target: &Path, name: &Path) -> FsResult<()> {
        fs::hard_link(target, name).map_err(|e| FsError::from_io(e, name))
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<HandleId> {
        let file = common::open_options(flags)
            .mode(DEFAULT_CREATE_MODE)
            .open(path)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(self.handles.register(path, file, flags))
    }

    fn create(&self, path: &Path, mode: u32) -> FsResult<HandleId> {
        let flags = OpenFlags::create_write_only();
        let file = common::open_options(flags)
            .mode(mode & PERM_MASK)
            .open(path)
            .map_err(|e| FsError::from_io(e, path))?;
        Ok(self.handles.register(path, file, flags))
    }

    fn read(&self, _path: &Path, size: u32, offset: u64, fh: HandleId) -> FsResult<Vec<u8>> {
        let handle = self.handles.lookup(fh)?;
        common::read_at(&handle, size, offset)
    }

    fn write(&self, _path: &Path, data: &[u8], offset: u64, fh: HandleId) -> FsResult<u32> {
        let handle = self.handles.lookup(fh)?;
        common::write_at(&handle, data, offset)
    }

    fn truncate(&self, path: &Path, length: u64, fh: Option<HandleId>) -> FsResult<()> {
        common::truncate(&self.handles, path, length, fh)
    }

    fn flush(&self, _path: &Path, fh: HandleId) -> FsResult<()> {
        self.handles.lookup(fh)?.with_file(|file| file.sync_all())
    }

    fn release(&self, _path: &Path, fh: HandleId) -> FsResult<()> {
        self.handles.unregister(fh)
    }

    fn fsync(&self, _path: &Path, datasync: bool, fh: HandleId) -> FsResult<()> {
        let handle = self.handles.lookup(fh)?;
        if datasync {
            handle.with_file(|file| file.sync_data())
        } else {
            handle.with_file(|file| file.sync_all())
        }
    }
}

/// FIFOs, sockets and device nodes.
#[cfg(target_os = "linux")]
fn mknod_special(path: &Path, mode: u32, dev: u64) -> FsResult<()> {
    use rustix::fs::{FileType, Mode};

    rustix::fs::mknodat(
        CWD,
        path,
        FileType::from_raw_mode(mode),
        Mode::from_raw_mode(mode & PERM_MASK),
        dev,
    )
    .map_err(|e| FsError::from_io(e.into(), path))
}

#[cfg(not(target_os = "linux"))]
fn mknod_special(path: &Path, mode: u32, _dev: u64) -> FsResult<()> {
    Err(FsError::unsupported(format!(
        "mknod type {:#o} at {}",
        mode & S_IFMT,
        path.display()
    )))
}
