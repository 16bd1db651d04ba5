//! Pieces both backends share: handle I/O, listing, truncation.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use netfs_proto::codec::system_time_to_secs;
use netfs_proto::{DirListing, FsError, FsResult, HandleId, OpenFlags};

use crate::handles::{HandleRegistry, OpenHandle};

/// Read buffers start no larger than this; `take` grows them as needed.
const MAX_READ_PREALLOC: usize = 1 << 20;

/// Map decoded open flags onto `OpenOptions`.
pub(crate) fn open_options(flags: OpenFlags) -> OpenOptions {
    let mut options = OpenOptions::new();
    options
        .read(flags.read)
        .write(flags.write)
        .append(flags.append)
        .truncate(flags.truncate);
    if flags.create && flags.exclusive {
        options.create_new(true);
    } else {
        options.create(flags.create);
    }
    options
}

/// Seek to `offset` and read up to `size` bytes. Short at end of file.
pub(crate) fn read_at(handle: &OpenHandle, size: u32, offset: u64) -> FsResult<Vec<u8>> {
    handle.with_file(|file| {
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity((size as usize).min(MAX_READ_PREALLOC));
        Read::by_ref(file).take(u64::from(size)).read_to_end(&mut buf)?;
        Ok(buf)
    })
}

/// Seek to `offset` and write all of `data`.
pub(crate) fn write_at(handle: &OpenHandle, data: &[u8], offset: u64) -> FsResult<u32> {
    let len = u32::try_from(data.len())
        .map_err(|_| FsError::invalid_argument(format!("write of {} bytes", data.len())))?;
    handle.with_file(|file| {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    })?;
    Ok(len)
}

/// Names of the immediate children of `path`, after `.` and `..`.
///
/// Names that aren't valid UTF-8 can't be carried in JSON without changing
/// them, and a changed name would not resolve back to the same entry, so
/// they are left out of the listing.
pub(crate) fn list_dir(path: &Path) -> FsResult<DirListing> {
    let entries = fs::read_dir(path).map_err(|e| FsError::from_io(e, path))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FsError::from_io(e, path))?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::warn!(
                dir = %path.display(),
                name = ?raw,
                "skipping entry with non-UTF-8 name"
            ),
        }
    }
    Ok(DirListing::new(names))
}

/// Set a file's length through a writable handle if one is given, else by
/// path. Both routes end at the same size.
pub(crate) fn truncate(
    handles: &HandleRegistry,
    path: &Path,
    length: u64,
    fh: Option<HandleId>,
) -> FsResult<()> {
    if let Some(fh) = fh {
        let handle = handles.lookup(fh)?;
        if !handle.flags().is_read_only() {
            return handle.with_file(|file| file.set_len(length));
        }
    }
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| FsError::from_io(e, path))?;
    file.set_len(length).map_err(|e| FsError::from_io(e, path))
}

/// Seconds for a timestamp the platform may not provide.
pub(crate) fn secs_or_epoch(time: std::io::Result<SystemTime>) -> f64 {
    system_time_to_secs(time.unwrap_or(UNIX_EPOCH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_past_end_is_short() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"hello").unwrap();

        let registry = HandleRegistry::new();
        let id = registry.register(&path, fs::File::open(&path).unwrap(), OpenFlags::read());
        let handle = registry.lookup(id).unwrap();

        assert_eq!(read_at(&handle, 100, 3).unwrap(), b"lo");
        assert!(read_at(&handle, 10, 50).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_by_path_and_handle_agree() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"0123456789").unwrap();
        fs::write(&b, b"0123456789").unwrap();

        let registry = HandleRegistry::new();
        let file = open_options(OpenFlags::from_wire(2).unwrap()).open(&b).unwrap();
        let id = registry.register(&b, file, OpenFlags::from_wire(2).unwrap());

        truncate(&registry, &a, 4, None).unwrap();
        truncate(&registry, &b, 4, Some(id)).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
        assert_eq!(fs::metadata(&a).unwrap().len(), 4);
    }

    #[test]
    fn test_truncate_with_unknown_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, b"x").unwrap();
        let registry = HandleRegistry::new();
        assert!(matches!(
            truncate(&registry, &path, 0, Some(99)),
            Err(FsError::BadHandle(99))
        ));
    }

    #[test]
    fn test_list_dir_has_dot_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), b"").unwrap();
        let names: Vec<_> = list_dir(dir.path()).unwrap().collect();
        assert_eq!(names, [".", "..", "x"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_list_dir_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok"), b"").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff")), b"").unwrap();

        let names: Vec<_> = list_dir(dir.path()).unwrap().collect();
        assert_eq!(names, [".", "..", "ok"]);
    }
}
