//! Open flags and mode bits in their wire encoding.
//!
//! Both travel as Linux numeric values whatever the host, so a Linux
//! client can talk to a Windows server. Clients translate host flags with
//! [`OpenFlags::from_host`]; backends decode with [`OpenFlags::from_wire`].

use crate::error::{FsError, FsResult};

/// Access mode mask.
pub const O_ACCMODE: i32 = 0o3;
/// Read-only access.
pub const O_RDONLY: i32 = 0o0;
/// Write-only access.
pub const O_WRONLY: i32 = 0o1;
/// Read-write access.
pub const O_RDWR: i32 = 0o2;
/// Create if missing.
pub const O_CREAT: i32 = 0o100;
/// Fail if it exists (with `O_CREAT`).
pub const O_EXCL: i32 = 0o200;
/// Truncate on open.
pub const O_TRUNC: i32 = 0o1000;
/// Append on every write.
pub const O_APPEND: i32 = 0o2000;

/// File type mask for `st_mode`.
pub const S_IFMT: u32 = 0o170000;
/// Socket.
pub const S_IFSOCK: u32 = 0o140000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Block device.
pub const S_IFBLK: u32 = 0o060000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Character device.
pub const S_IFCHR: u32 = 0o020000;
/// FIFO.
pub const S_IFIFO: u32 = 0o010000;

/// Permission bits.
pub const PERM_MASK: u32 = 0o7777;

/// Access-check bits for `access`.
pub const F_OK: i32 = 0;
pub const X_OK: i32 = 1;
pub const W_OK: i32 = 2;
pub const R_OK: i32 = 4;

/// Decoded open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write-only access, creating the file if needed. This is what
    /// `create` opens with.
    pub fn create_write_only() -> Self {
        Self {
            read: false,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Returns true if the handle cannot modify the file.
    pub fn is_read_only(&self) -> bool {
        !self.write && !self.append
    }

    /// Decode the wire (Linux) encoding.
    ///
    /// Unknown bits (`O_NONBLOCK`, `O_CLOEXEC`, `O_LARGEFILE`, ...) are ignored;
    /// an access mode of `3` is rejected.
    pub fn from_wire(flags: i32) -> FsResult<Self> {
        let (read, write) = match flags & O_ACCMODE {
            O_RDONLY => (true, false),
            O_WRONLY => (false, true),
            O_RDWR => (true, true),
            _ => {
                return Err(FsError::invalid_argument(format!(
                    "bad access mode in open flags {flags:#o}"
                )));
            }
        };

        Ok(Self {
            read,
            write,
            append: flags & O_APPEND != 0,
            create: flags & O_CREAT != 0,
            truncate: flags & O_TRUNC != 0,
            exclusive: flags & O_EXCL != 0,
        })
    }

    /// Encode into the wire (Linux) encoding.
    pub fn to_wire(&self) -> i32 {
        let mut flags = match (self.read, self.write) {
            (_, false) => O_RDONLY,
            (false, true) => O_WRONLY,
            (true, true) => O_RDWR,
        };
        if self.append {
            flags |= O_APPEND;
        }
        if self.create {
            flags |= O_CREAT;
        }
        if self.truncate {
            flags |= O_TRUNC;
        }
        if self.exclusive {
            flags |= O_EXCL;
        }
        flags
    }

    /// Translate host `open(2)` flags into the wire encoding.
    #[cfg(unix)]
    pub fn from_host(flags: i32) -> FsResult<Self> {
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_RDONLY => (true, false),
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => {
                return Err(FsError::invalid_argument(format!(
                    "bad access mode in open flags {flags:#o}"
                )));
            }
        };

        Ok(Self {
            read,
            write,
            append: flags & libc::O_APPEND != 0,
            create: flags & libc::O_CREAT != 0,
            truncate: flags & libc::O_TRUNC != 0,
            exclusive: flags & libc::O_EXCL != 0,
        })
    }

    /// Translate host flags into the wire encoding (already Linux-shaped here).
    #[cfg(not(unix))]
    pub fn from_host(flags: i32) -> FsResult<Self> {
        Self::from_wire(flags)
    }
}

/// File type bits of a wire `st_mode`.
pub fn file_type_bits(mode: u32) -> u32 {
    mode & S_IFMT
}
