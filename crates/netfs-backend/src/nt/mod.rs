//! Windows-NT passthrough backend.
//!
//! Same operation surface as the POSIX backend with NT rules layered on:
//!
//! - Device names (`CON`, `PRN`, `AUX`, `NUL`, `COM1`-`COM9`, `LPT1`-`LPT9`)
//!   are refused as new entries, in any case and with any extension.
//! - New files and directories get a full-control ACE for their owner,
//!   added after creation. A crash between the two leaves the object with
//!   inherited permissions only.
//! - `statfs` reports volume clusters; file counts are not available and
//!   read as zero.
//! - There is no POSIX ownership: uid/gid read as zero, `chown` is accepted
//!   and ignored, and `st_mode` is synthesised from the file type and the
//!   read-only attribute.
//! - Handles remember their open flags so `flush` can skip read-only ones.
//!
//! The core runs on any host over `std::fs`. Only the ACL step and volume
//! geometry go through Win32; elsewhere the ACL step is a no-op and the
//! geometry comes from `statvfs`.
//!
//! Per-call detail is logged at `trace` under this module's target.

#[cfg(windows)]
mod win32;

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::Path;
use std::time::SystemTime;

use netfs_proto::flags::{PERM_MASK, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, W_OK};
use netfs_proto::{
    DirListing, FileStat, FsError, FsOps, FsResult, HandleId, OpenFlags, StatVfs,
};

use crate::common;
use crate::handles::HandleRegistry;
use crate::{Backend, BackendKind};

/// Basenames that name devices on NT.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// NTFS component length limit.
const NAME_MAX: u64 = 255;

/// Volume cluster geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    cluster_size: u64,
    total_clusters: u64,
    free_clusters: u64,
}

/// True if `name` is a device name, with or without an extension or stream.
pub fn is_reserved_name(name: &str) -> bool {
    let stem = name.split(['.', ':']).next().unwrap_or(name);
    RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
}

fn check_reserved(path: &Path) -> FsResult<()> {
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    let name = name.to_string_lossy();
    if is_reserved_name(&name) {
        tracing::debug!(name = %name, "refusing reserved device name");
        return Err(FsError::invalid_argument(format!("reserved name: {name}")));
    }
    Ok(())
}

/// Give a freshly created object's owner full control.
fn grant_owner_full_control(path: &Path, is_dir: bool) -> FsResult<()> {
    #[cfg(windows)]
    {
        win32::grant_owner_full_control(path, is_dir).inspect_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "created object left without owner ACE");
        })
    }

    #[cfg(not(windows))]
    {
        tracing::trace!(path = %path.display(), is_dir, "owner ACE skipped off Windows");
        Ok(())
    }
}

fn geometry(path: &Path) -> FsResult<Geometry> {
    #[cfg(windows)]
    {
        win32::geometry(path)
    }

    #[cfg(unix)]
    {
        let stat = rustix::fs::statvfs(path).map_err(|e| FsError::from_io(e.into(), path))?;
        Ok(Geometry {
            cluster_size: stat.f_frsize,
            total_clusters: stat.f_blocks,
            free_clusters: stat.f_bavail,
        })
    }

    #[cfg(not(any(windows, unix)))]
    {
        Err(FsError::unsupported(format!("statfs on {}", path.display())))
    }
}

fn open_for_times(path: &Path) -> std::io::Result<File> {
    #[cfg(windows)]
    {
        win32::open_for_times(path)
    }

    #[cfg(not(windows))]
    {
        File::open(path)
    }
}

#[cfg(unix)]
fn link_count(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.nlink()
}

#[cfg(not(unix))]
fn link_count(_meta: &Metadata) -> u64 {
    1
}

#[cfg(windows)]
fn make_symlink(target: &str, name: &Path) -> std::io::Result<()> {
    let resolved = name.parent().unwrap_or(name).join(target);
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, name)
    } else {
        std::os::windows::fs::symlink_file(target, name)
    }
}

#[cfg(unix)]
fn make_symlink(target: &str, name: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, name)
}

#[cfg(not(any(windows, unix)))]
fn make_symlink(_target: &str, _name: &Path) -> std::io::Result<()> {
    Err(std::io::ErrorKind::Unsupported.into())
}

/// Windows-NT filesystem backend.
#[derive(Debug, Default)]
pub struct NtBackend {
    handles: HandleRegistry,
}

impl NtBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `st_mode` the way NT hosts report it: full permissions for the type,
    /// minus the write bits when the read-only attribute is set.
    fn synthesize_mode(meta: &Metadata) -> u32 {
        let file_type = meta.file_type();
        let mode = if file_type.is_symlink() {
            S_IFLNK | 0o777
        } else if file_type.is_dir() {
            S_IFDIR | 0o777
        } else {
            S_IFREG | 0o666
        };
        if meta.permissions().readonly() {
            mode & !0o222
        } else {
            mode
        }
    }

    fn stat(meta: &Metadata) -> FileStat {
        FileStat {
            st_atime: common::secs_or_epoch(meta.accessed()),
            st_ctime: common::secs_or_epoch(meta.created().or_else(|_| meta.modified())),
            st_gid: 0,
            st_mode: Self::synthesize_mode(meta),
            st_mtime: common::secs_or_epoch(meta.modified()),
            st_nlink: link_count(meta),
            st_size: meta.len(),
            st_uid: 0,
        }
    }

    fn create_regular(&self, path: &Path, exclusive: bool) -> FsResult<File> {
        check_reserved(path)?;
        let mut options = OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true);
        }
        let file = options.open(path).map_err(|e| FsError::from_io(e, path))?;
        grant_owner_full_control(path, false)?;
        Ok(file)
    }

    /// Open with decoded flags. The second value is true when this call
    /// created the file, which then gets the owner ACE like `create` does.
    ///
    /// With `O_CREAT` the exclusive open runs first, so "did we create it"
    /// is decided by the filesystem rather than a separate existence check.
    fn open_file(&self, path: &Path, flags: OpenFlags) -> FsResult<(File, bool)> {
        if !flags.create {
            let file = common::open_options(flags)
                .open(path)
                .map_err(|e| FsError::from_io(e, path))?;
            return Ok((file, false));
        }

        check_reserved(path)?;
        let fresh = OpenFlags {
            exclusive: true,
            ..flags
        };
        match common::open_options(fresh).open(path) {
            Ok(file) => {
                grant_owner_full_control(path, false)?;
                Ok((file, true))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && !flags.exclusive => {
                let file = common::open_options(flags)
                    .open(path)
                    .map_err(|e| FsError::from_io(e, path))?;
                Ok((file, false))
            }
            Err(e) => Err(FsError::from_io(e, path)),
        }
    }
}

impl Backend for NtBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nt
    }

    fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    fn as_fs(&self) -> &dyn FsOps {
        self
    }
}

impl FsOps for NtBackend {
    fn access(&self, path: &Path, mode: i32) -> FsResult<()> {
        let meta = fs::metadata(path).map_err(|e| FsError::from_io(e, path))?;
        if mode & W_OK != 0 && meta.permissions().readonly() {
            return Err(FsError::permission_denied(path.display().to_string()));
        }
        Ok(())
    }

    /// Only the owner-write bit has an NT meaning: it clears or sets the
    /// read-only attribute.
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        let meta = fs::metadata(path).map_err(|e| FsError::from_io(e, path))?;
        let mut permissions = meta.permissions();
        permissions.set_readonly(mode & PERM_MASK & 0o200 == 0);
        fs::set_permissions(path, permissions).map_err(|e| FsError::from_io(e, path))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        tracing::trace!(path = %path.display(), ?uid, ?gid, "chown ignored");
        fs::symlink_metadata(path).map_err(|e| FsError::from_io(e, path))?;
        Ok(())
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
        let geometry = geometry(path)?;
        tracing::trace!(?geometry, "volume geometry");
        Ok(StatVfs {
            f_bavail: geometry.free_clusters,
            f_bfree: geometry.free_clusters,
            f_blocks: geometry.total_clusters,
            f_bsize: geometry.cluster_size,
            f_favail: 0,
            f_ffree: 0,
            f_files: 0,
            f_flag: 0,
            f_frsize: geometry.cluster_size,
            f_namemax: NAME_MAX,
        })
    }

    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> FsResult<()> {
        let (atime, mtime) = times.unwrap_or_else(|| {
            let now = SystemTime::now();
            (now, now)
        });
        let file = open_for_times(path).map_err(|e| FsError::from_io(e, path))?;
        let times = fs::FileTimes::new()
            .set_accessed(atime)
            .set_modified(mtime);
        file.set_times(times).map_err(|e| FsError::from_io(e, path))
    }

    fn mknod(&self, path: &Path, mode: u32, _dev: u64) -> FsResult<()> {
        let kind = mode & S_IFMT;
        if kind != 0 && kind != S_IFREG {
            return Err(FsError::unsupported(format!(
                "mknod type {kind:#o} at {}",
                path.display()
            )));
        }
        self.create_regular(path, true)?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self), name = "nt.mkdir")]
    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        check_reserved(path)?;
        fs::create_dir(path).map_err(|e| FsError::from_io(e, path))?;
        grant_owner_full_control(path, true)
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        fs::remove_dir(path).map_err(|e| FsError::from_io(e, path))
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        fs::remove_file(path).map_err(|e| FsError::from_io(e, path))
    }

    fn symlink(&self, name: &Path, target: &str) -> FsResult<()> {
        check_reserved(name)?;
        make_symlink(target, name).map_err(|e| FsError::from_io(e, name))
    }

    fn rename(&self, old: &Path, new: &Path) -> FsResult<()> {
        check_reserved(new)?;
        fs::rename(old, new).map_err(|e| FsError::from_io(e, old))
    }

    fn link(&self, target: &Path, name: &Path) -> FsResult<()> {
        check_reserved(name)?;
        fs::hard_link(target, name).map_err(|e| FsError::from_io(e, name))
    }

    #[tracing::instrument(level = "trace", skip(self), name = "nt.open")]
    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<HandleId> {
        let (file, _created) = self.open_file(path, flags)?;
        Ok(self.handles.register(path, file, flags))
    }

    #[tracing::instrument(level = "trace", skip(self), name = "nt.create")]
    fn create(&self, path: &Path, mode: u32) -> FsResult<HandleId> {
        let file = self.create_regular(path, false)?;
        Ok(self
            .handles
            .register(path, file, OpenFlags::create_write_only()))
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
        let handle = self.handles.lookup(fh)?;
        if handle.flags().is_read_only() {
            tracing::trace!(fh, "flush skipped for read-only handle");
            return Ok(());
        }
        handle.with_file(|file| file.sync_all())
    }

    fn release(&self, _path: &Path, fh: HandleId) -> FsResult<()> {
        self.handles.unregister(fh)
    }

    fn fsync(&self, _path: &Path, datasync: bool, fh: HandleId) -> FsResult<()> {
        let handle = self.handles.lookup(fh)?;
        if handle.flags().is_read_only() {
            return Ok(());
        }
        if datasync {
            handle.with_file(|file| file.sync_data())
        } else {
            handle.with_file(|file| file.sync_all())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netfs_proto::flags::{F_OK, O_CREAT, O_EXCL, O_RDWR, S_IFIFO};
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn setup() -> (NtBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        (NtBackend::new(), dir)
    }

    #[test]
    fn test_reserved_names() {
        for name in ["CON", "con", "Nul", "COM1", "com1.txt", "LPT9.tar.gz", "aux:stream", "PRN."] {
            assert!(is_reserved_name(name), "{name}");
        }
        for name in ["CONSOLE", "COM10", "LPT", "nul_file", "my.con", "a"] {
            assert!(!is_reserved_name(name), "{name}");
        }
    }

    #[test]
    fn test_open_with_create_reports_new_files() {
        let (backend, dir) = setup();
        let path = dir.path().join("fresh");
        let flags = OpenFlags::from_wire(O_RDWR | O_CREAT).unwrap();

        let (_file, created) = backend.open_file(&path, flags).unwrap();
        assert!(created);
        assert!(path.exists());

        let (_file, created) = backend.open_file(&path, flags).unwrap();
        assert!(!created);

        let exclusive = OpenFlags::from_wire(O_RDWR | O_CREAT | O_EXCL).unwrap();
        assert!(matches!(
            backend.open_file(&path, exclusive),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_open_with_create_rejects_reserved_names() {
        let (backend, dir) = setup();
        let flags = OpenFlags::from_wire(O_RDWR | O_CREAT).unwrap();
        assert!(matches!(
            backend.open(&dir.path().join("LPT1.log"), flags),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reserved_create_rejected_and_nothing_created() {
        let (backend, dir) = setup();
        for name in ["CON", "nul.txt", "com1"] {
            let path = dir.path().join(name);
            assert!(matches!(
                backend.create(&path, 0o644),
                Err(FsError::InvalidArgument(_))
            ));
            assert!(matches!(
                backend.mkdir(&path, 0o755),
                Err(FsError::InvalidArgument(_))
            ));
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(backend.handles().is_empty());
    }

    #[test]
    fn test_create_write_release_reopen_read() {
        let (backend, dir) = setup();
        let path = dir.path().join("b.txt");

        let fh = backend.create(&path, 0o644).unwrap();
        backend.write(&path, b"hi", 0, fh).unwrap();
        backend.release(&path, fh).unwrap();

        let fh2 = backend.open(&path, OpenFlags::read()).unwrap();
        assert_eq!(backend.read(&path, 2, 0, fh2).unwrap(), b"hi");
        backend.release(&path, fh2).unwrap();
    }

    #[test]
    fn test_getattr_zero_owner_and_synthesized_mode() {
        let (backend, dir) = setup();
        let file = dir.path().join("f");
        fs::write(&file, b"abc").unwrap();

        let attr = backend.getattr(&file, None).unwrap();
        assert_eq!((attr.st_uid, attr.st_gid), (0, 0));
        assert_eq!(attr.st_mode, S_IFREG | 0o666);
        assert_eq!(attr.st_size, 3);

        let attr = backend.getattr(dir.path(), None).unwrap();
        assert_eq!(attr.st_mode & S_IFMT, S_IFDIR);
    }

    #[test]
    fn test_read_only_attribute_clears_write_bits() {
        let (backend, dir) = setup();
        let file = dir.path().join("f");
        fs::write(&file, b"").unwrap();

        backend.chmod(&file, 0o444).unwrap();
        assert_eq!(backend.getattr(&file, None).unwrap().st_mode, S_IFREG | 0o444);

        backend.chmod(&file, 0o644).unwrap();
        assert_eq!(backend.getattr(&file, None).unwrap().st_mode, S_IFREG | 0o666);
    }

    #[test]
    fn test_flush_skipped_for_read_only_handle() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        fs::write(&path, b"data").unwrap();

        let fh = backend.open(&path, OpenFlags::read()).unwrap();
        backend.flush(&path, fh).unwrap();
        backend.fsync(&path, false, fh).unwrap();
        backend.release(&path, fh).unwrap();
        assert!(matches!(backend.flush(&path, fh), Err(FsError::BadHandle(_))));
    }

    #[test]
    fn test_flush_writable_handle() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        let fh = backend.create(&path, 0o644).unwrap();
        backend.write(&path, b"data", 0, fh).unwrap();
        backend.flush(&path, fh).unwrap();
        backend.fsync(&path, true, fh).unwrap();
    }

    #[test]
    fn test_statfs_cluster_accounting() {
        let (backend, dir) = setup();
        let first = backend.statfs(dir.path()).unwrap();
        let second = backend.statfs(dir.path()).unwrap();

        assert_eq!(first.f_bsize, first.f_frsize);
        assert_eq!(first.f_bfree, first.f_bavail);
        assert_eq!((first.f_files, first.f_ffree, first.f_favail), (0, 0, 0));
        assert_eq!(first.f_namemax, 255);
        assert_eq!(first.f_blocks * first.f_bsize, second.f_blocks * second.f_bsize);
    }

    #[test]
    fn test_chown_is_accepted_and_ignored() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        fs::write(&path, b"").unwrap();
        backend.chown(&path, Some(1000), Some(1000)).unwrap();
        assert!(matches!(
            backend.chown(&dir.path().join("missing"), None, None),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_mknod_regular_only() {
        let (backend, dir) = setup();
        backend.mknod(&dir.path().join("plain"), S_IFREG | 0o644, 0).unwrap();
        assert!(matches!(
            backend.mknod(&dir.path().join("pipe"), S_IFIFO | 0o644, 0),
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(
            backend.mknod(&dir.path().join("LPT1"), S_IFREG | 0o644, 0),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_access_checks_read_only_attribute() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        fs::write(&path, b"").unwrap();
        backend.access(&path, F_OK | W_OK).unwrap();

        backend.chmod(&path, 0o444).unwrap();
        assert!(matches!(
            backend.access(&path, W_OK),
            Err(FsError::PermissionDenied(_))
        ));
        backend.access(&path, F_OK).unwrap();
    }

    #[test]
    fn test_utimens() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        fs::write(&path, b"").unwrap();

        let mtime = UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        backend.utimens(&path, Some((mtime, mtime))).unwrap();
        let attr = backend.getattr(&path, None).unwrap();
        assert!((attr.st_mtime - 1_500_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_truncate_and_read_write_handle() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        fs::write(&path, b"0123456789").unwrap();

        let fh = backend.open(&path, OpenFlags::from_wire(O_RDWR).unwrap()).unwrap();
        backend.truncate(&path, 3, Some(fh)).unwrap();
        assert_eq!(backend.read(&path, 100, 0, fh).unwrap(), b"012");
    }

    #[test]
    fn test_readdir_includes_dot_entries() {
        let (backend, dir) = setup();
        fs::write(dir.path().join("x"), b"").unwrap();
        let names: Vec<_> = backend.readdir(dir.path(), 0).unwrap().collect();
        assert_eq!(names, [".", "..", "x"]);
    }

    #[test]
    fn test_registry_closed_on_drop() {
        let (backend, dir) = setup();
        let path = dir.path().join("f");
        backend.create(&path, 0o644).unwrap();
        backend.create(&path, 0o644).unwrap();
        assert_eq!(backend.handles().len(), 2);
        drop(backend);
        fs::remove_file(&path).unwrap();
    }
}
