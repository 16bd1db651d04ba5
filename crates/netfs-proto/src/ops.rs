//! Filesystem operations trait.
//!
//! Path-based and handle-explicit, one method per catalogue operation. The
//! server's backends implement it over a local root; the client implements
//! it by forwarding each call over HTTP, so a kernel adapter can drive
//! either the same way.

use std::path::Path;
use std::time::SystemTime;

use crate::error::FsResult;
use crate::flags::OpenFlags;
use crate::schema::{FileStat, StatVfs};

/// Opaque open-file identifier issued by a backend's handle registry.
pub type HandleId = u64;

/// Lazy directory listing. Always starts with `.` and `..`.
#[derive(Debug)]
pub struct DirListing {
    names: std::vec::IntoIter<String>,
}

impl DirListing {
    /// Build a listing from entry names, prepending `.` and `..`.
    pub fn new(entries: impl IntoIterator<Item = String>) -> Self {
        let names: Vec<String> = [".".to_string(), "..".to_string()]
            .into_iter()
            .chain(entries)
            .collect();
        Self {
            names: names.into_iter(),
        }
    }

    /// Build a listing from names exactly as received (client side).
    pub fn from_wire(names: Vec<String>) -> Self {
        Self {
            names: names.into_iter(),
        }
    }
}

impl Iterator for DirListing {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.names.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

/// Core filesystem operations.
///
/// Paths passed to a server backend are already resolved under its root;
/// paths passed to the client are virtual paths as the kernel sees them.
pub trait FsOps: Send + Sync {
    // ========================================================================
    // Metadata
    // ========================================================================

    /// Check existence and access bits (`F_OK`, `R_OK`, `W_OK`, `X_OK`).
    fn access(&self, path: &Path, mode: i32) -> FsResult<()>;

    /// Set permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Change owner. `None` leaves that id unchanged.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;

    /// Stat a path, or an open handle when `fh` is given.
    fn getattr(&self, path: &Path, fh: Option<HandleId>) -> FsResult<FileStat>;

    /// List a directory.
    fn readdir(&self, path: &Path, fh: HandleId) -> FsResult<DirListing>;

    /// Read a symlink's stored target.
    fn readlink(&self, path: &Path) -> FsResult<String>;

    /// Volume statistics for the filesystem containing `path`.
    fn statfs(&self, path: &Path) -> FsResult<StatVfs>;

    /// Set access and modification times; `None` means now.
    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> FsResult<()>;

    // ========================================================================
    // Namespace
    // ========================================================================

    /// Create a filesystem node.
    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> FsResult<()>;

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> FsResult<()>;

    fn unlink(&self, path: &Path) -> FsResult<()>;

    /// Create a symlink at `name` whose content is `target`, stored verbatim.
    fn symlink(&self, name: &Path, target: &str) -> FsResult<()>;

    fn rename(&self, old: &Path, new: &Path) -> FsResult<()>;

    /// Create a hard link `name` to the existing file `target`.
    fn link(&self, target: &Path, name: &Path) -> FsResult<()>;

    // ========================================================================
    // Handles and data
    // ========================================================================

    /// Open an existing file and register a handle.
    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<HandleId>;

    /// Create (or open for writing) a file and register a handle.
    fn create(&self, path: &Path, mode: u32) -> FsResult<HandleId>;

    /// Read up to `size` bytes at `offset`. Short at end of file.
    fn read(&self, path: &Path, size: u32, offset: u64, fh: HandleId) -> FsResult<Vec<u8>>;

    /// Write all of `data` at `offset`, returning the byte count.
    fn write(&self, path: &Path, data: &[u8], offset: u64, fh: HandleId) -> FsResult<u32>;

    /// Set file length, through a handle when one is given.
    fn truncate(&self, path: &Path, length: u64, fh: Option<HandleId>) -> FsResult<()>;

    /// Push buffered data for a handle to stable storage.
    fn flush(&self, path: &Path, fh: HandleId) -> FsResult<()>;

    /// Close a handle. Releasing an unknown handle is `BadHandle`.
    fn release(&self, path: &Path, fh: HandleId) -> FsResult<()>;

    /// Sync a handle; `datasync` skips metadata where the host allows.
    fn fsync(&self, path: &Path, datasync: bool, fh: HandleId) -> FsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool {
        self.getattr(path, None).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_starts_with_dot_entries() {
        let names: Vec<_> = DirListing::new(vec!["a".into(), "b".into()]).collect();
        assert_eq!(names, [".", "..", "a", "b"]);
    }

    #[test]
    fn test_empty_listing_still_has_dot_entries() {
        assert_eq!(DirListing::new(Vec::new()).count(), 2);
    }
}
