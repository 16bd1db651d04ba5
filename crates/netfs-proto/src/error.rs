//! Filesystem error taxonomy.
//!
//! Errors cross three layers: the local OS error raised by a backend, the
//! wire [`ErrorCode`] carried in an error envelope, and the errno the
//! kernel-facing adapter hands back to the host. [`FsError`] is the single
//! type that travels through all three.

use std::io;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Filesystem error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Handle id is not (or no longer) registered.
    #[error("bad file handle: {0}")]
    BadHandle(u64),

    /// No space left on the backing volume.
    #[error("no space left on device: {0}")]
    NoSpace(String),

    /// Invalid argument (reserved name, bad flags, bad mode).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Path escapes the server root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Cross-device link.
    #[error("cross-device link: {0}")]
    CrossDeviceLink(String),

    /// File name too long.
    #[error("file name too long: {0}")]
    NameTooLong(String),

    /// Too many symbolic links.
    #[error("too many symbolic links: {0}")]
    TooManySymlinks(String),

    /// Operation not supported by this backend.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Filesystem is read-only.
    #[error("read-only filesystem: {0}")]
    ReadOnly(String),

    /// Unclassified I/O error.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Server unreachable or response unreadable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request rejected before it reached a backend.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Error category carried in the `code` field of an error envelope.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    BadHandle,
    NoSpace,
    InvalidArgument,
    PathEscapesRoot,
    CrossDeviceLink,
    NameTooLong,
    TooManySymlinks,
    Unsupported,
    ReadOnly,
    Io,
    Protocol,
    Other,
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach the path that failed to an I/O error, classifying it.
    pub fn from_io(err: io::Error, path: &std::path::Path) -> Self {
        let context = path.display().to_string();
        match Self::from(err) {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), format!("{context}: {e}"))),
            Self::NotFound(_) => Self::NotFound(context),
            Self::PermissionDenied(_) => Self::PermissionDenied(context),
            Self::AlreadyExists(_) => Self::AlreadyExists(context),
            Self::NotADirectory(_) => Self::NotADirectory(context),
            Self::IsADirectory(_) => Self::IsADirectory(context),
            Self::DirectoryNotEmpty(_) => Self::DirectoryNotEmpty(context),
            Self::NoSpace(_) => Self::NoSpace(context),
            Self::InvalidArgument(msg) => Self::InvalidArgument(format!("{context}: {msg}")),
            Self::CrossDeviceLink(_) => Self::CrossDeviceLink(context),
            Self::NameTooLong(_) => Self::NameTooLong(context),
            Self::TooManySymlinks(_) => Self::TooManySymlinks(context),
            Self::ReadOnly(_) => Self::ReadOnly(context),
            other => other,
        }
    }

    /// Wire category for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::NotADirectory(_) => ErrorCode::NotADirectory,
            Self::IsADirectory(_) => ErrorCode::IsADirectory,
            Self::DirectoryNotEmpty(_) => ErrorCode::DirectoryNotEmpty,
            Self::BadHandle(_) => ErrorCode::BadHandle,
            Self::NoSpace(_) => ErrorCode::NoSpace,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::PathEscapesRoot(_) => ErrorCode::PathEscapesRoot,
            Self::CrossDeviceLink(_) => ErrorCode::CrossDeviceLink,
            Self::NameTooLong(_) => ErrorCode::NameTooLong,
            Self::TooManySymlinks(_) => ErrorCode::TooManySymlinks,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::ReadOnly(_) => ErrorCode::ReadOnly,
            Self::Io(_) => ErrorCode::Io,
            Self::Transport(_) | Self::Protocol(_) => ErrorCode::Protocol,
            Self::Other(_) => ErrorCode::Other,
        }
    }

    /// Rebuild an error from an envelope's `code` and `error` fields.
    ///
    /// The message is kept as-is; the variant comes from the code. Envelopes
    /// without a code (older servers) become [`FsError::Other`].
    pub fn from_wire(code: Option<ErrorCode>, message: String) -> Self {
        let Some(code) = code else {
            return Self::Other(message);
        };
        match code {
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::PermissionDenied => Self::PermissionDenied(message),
            ErrorCode::AlreadyExists => Self::AlreadyExists(message),
            ErrorCode::NotADirectory => Self::NotADirectory(message),
            ErrorCode::IsADirectory => Self::IsADirectory(message),
            ErrorCode::DirectoryNotEmpty => Self::DirectoryNotEmpty(message),
            ErrorCode::BadHandle => Self::BadHandle(parse_handle_id(&message)),
            ErrorCode::NoSpace => Self::NoSpace(message),
            ErrorCode::InvalidArgument => Self::InvalidArgument(message),
            ErrorCode::PathEscapesRoot => Self::PathEscapesRoot(message),
            ErrorCode::CrossDeviceLink => Self::CrossDeviceLink(message),
            ErrorCode::NameTooLong => Self::NameTooLong(message),
            ErrorCode::TooManySymlinks => Self::TooManySymlinks(message),
            ErrorCode::Unsupported => Self::Unsupported(message),
            ErrorCode::ReadOnly => Self::ReadOnly(message),
            ErrorCode::Io => Self::Io(io::Error::other(message)),
            ErrorCode::Protocol => Self::Protocol(message),
            ErrorCode::Other => Self::Other(message),
        }
    }

    /// Host errno for the kernel-facing adapter.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::PermissionDenied(_) | Self::PathEscapesRoot(_) => libc::EACCES,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Self::BadHandle(_) => libc::EBADF,
            Self::NoSpace(_) => libc::ENOSPC,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::CrossDeviceLink(_) => libc::EXDEV,
            Self::NameTooLong(_) => libc::ENAMETOOLONG,
            Self::TooManySymlinks(_) => libc::ELOOP,
            Self::Unsupported(_) => libc::ENOSYS,
            Self::ReadOnly(_) => libc::EROFS,
            Self::Io(e) => e.raw_os_error().filter(|_| cfg!(unix)).unwrap_or(libc::EIO),
            Self::Transport(_) | Self::Protocol(_) => COMM_ERRNO,
            Self::Other(_) => libc::EIO,
        }
    }
}

#[cfg(target_os = "linux")]
const COMM_ERRNO: i32 = libc::ECOMM;
#[cfg(not(target_os = "linux"))]
const COMM_ERRNO: i32 = libc::EIO;

/// Recover the handle id from a `BadHandle` message ("bad file handle: 7").
fn parse_handle_id(message: &str) -> u64 {
    message
        .rsplit(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        if let Some(classified) = classify_os_error(&err) {
            return classified;
        }

        let msg = err.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(msg),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(msg),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(msg),
            io::ErrorKind::NotADirectory => Self::NotADirectory(msg),
            io::ErrorKind::IsADirectory => Self::IsADirectory(msg),
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(msg),
            io::ErrorKind::StorageFull => Self::NoSpace(msg),
            io::ErrorKind::InvalidInput => Self::InvalidArgument(msg),
            io::ErrorKind::ReadOnlyFilesystem => Self::ReadOnly(msg),
            io::ErrorKind::Unsupported => Self::Unsupported(msg),
            _ => Self::Io(err),
        }
    }
}

/// Classify by raw errno, which is more precise than `ErrorKind` on unix.
#[cfg(unix)]
fn classify_os_error(err: &io::Error) -> Option<FsError> {
    let msg = err.to_string();
    let classified = match err.raw_os_error()? {
        libc::ENOENT => FsError::NotFound(msg),
        libc::EACCES | libc::EPERM => FsError::PermissionDenied(msg),
        libc::EEXIST => FsError::AlreadyExists(msg),
        libc::ENOTDIR => FsError::NotADirectory(msg),
        libc::EISDIR => FsError::IsADirectory(msg),
        libc::ENOTEMPTY => FsError::DirectoryNotEmpty(msg),
        libc::EBADF => FsError::BadHandle(0),
        libc::ENOSPC | libc::EDQUOT => FsError::NoSpace(msg),
        libc::EINVAL => FsError::InvalidArgument(msg),
        libc::EXDEV => FsError::CrossDeviceLink(msg),
        libc::ENAMETOOLONG => FsError::NameTooLong(msg),
        libc::ELOOP => FsError::TooManySymlinks(msg),
        libc::ENOSYS | libc::EOPNOTSUPP => FsError::Unsupported(msg),
        libc::EROFS => FsError::ReadOnly(msg),
        _ => return None,
    };
    Some(classified)
}

/// Win32 error codes that `ErrorKind` folds together or leaves uncategorized.
#[cfg(windows)]
fn classify_os_error(err: &io::Error) -> Option<FsError> {
    const ERROR_INVALID_HANDLE: i32 = 6;
    const ERROR_DISK_FULL: i32 = 112;
    const ERROR_INVALID_NAME: i32 = 123;
    const ERROR_DIR_NOT_EMPTY: i32 = 145;
    const ERROR_FILENAME_EXCED_RANGE: i32 = 206;

    let msg = err.to_string();
    let classified = match err.raw_os_error()? {
        ERROR_INVALID_HANDLE => FsError::BadHandle(0),
        ERROR_DISK_FULL => FsError::NoSpace(msg),
        ERROR_INVALID_NAME => FsError::InvalidArgument(msg),
        ERROR_DIR_NOT_EMPTY => FsError::DirectoryNotEmpty(msg),
        ERROR_FILENAME_EXCED_RANGE => FsError::NameTooLong(msg),
        _ => return None,
    };
    Some(classified)
}

#[cfg(not(any(unix, windows)))]
fn classify_os_error(_err: &io::Error) -> Option<FsError> {
    None
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;
