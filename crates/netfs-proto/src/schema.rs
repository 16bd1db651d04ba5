//! Request and response schemas.
//!
//! One request struct per operation, field names exactly as they appear on
//! the wire. Requests reject unknown fields so a misspelt key is a
//! validation failure rather than a silently defaulted argument.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalogue::Operation;
use crate::codec::{base64_bytes, secs_to_system_time};
use crate::error::{FsError, FsResult};
use crate::flags::OpenFlags;
use crate::ops::{FsOps, HandleId};

/// Maps a client-supplied virtual path to a real path under the server root.
///
/// Operations pick the mode matching how the host call treats the last
/// component.
pub trait PathResolver {
    /// Leave a final symlink in place, for calls that act on the link itself.
    fn resolve(&self, virtual_path: &str) -> FsResult<PathBuf>;

    /// Chase a final symlink and return its contained target, for calls the
    /// host would follow (open, chmod, readdir and the like).
    fn resolve_follow(&self, virtual_path: &str) -> FsResult<PathBuf>;

    /// Like [`resolve`](Self::resolve), but refuse the root itself: it names
    /// a directory entry that is about to be created, removed or renamed.
    fn resolve_entry(&self, virtual_path: &str) -> FsResult<PathBuf>;
}

/// A typed operation request.
///
/// `invoke` resolves every path-typed field through the resolver and then
/// calls exactly one [`FsOps`] method with the declared arguments.
pub trait Request: Serialize + DeserializeOwned + Send + 'static {
    /// Operation this request belongs to.
    const OPERATION: Operation;

    /// Success payload (`()` for operations without one).
    type Response: Serialize + DeserializeOwned + Send + 'static;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<Self::Response>;
}

/// Interpret a wire owner id: negative means "leave unchanged".
fn owner_id(id: i64) -> FsResult<Option<u32>> {
    if id < 0 {
        return Ok(None);
    }
    u32::try_from(id)
        .map(Some)
        .map_err(|_| FsError::invalid_argument(format!("owner id {id} out of range")))
}

// ============================================================================
// Responses
// ============================================================================

/// `getattr` payload, shaped like `struct stat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStat {
    pub st_atime: f64,
    pub st_ctime: f64,
    pub st_gid: u32,
    pub st_mode: u32,
    pub st_mtime: f64,
    pub st_nlink: u64,
    pub st_size: u64,
    pub st_uid: u32,
}

/// `readdir` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaddirOutput {
    pub content: Vec<String>,
}

/// `readlink` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadlinkOutput {
    pub destination_path: String,
}

/// `statfs` payload, shaped like `struct statvfs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatVfs {
    pub f_bavail: u64,
    pub f_bfree: u64,
    pub f_blocks: u64,
    pub f_bsize: u64,
    pub f_favail: u64,
    pub f_ffree: u64,
    pub f_files: u64,
    pub f_flag: u64,
    pub f_frsize: u64,
    pub f_namemax: u64,
}

/// `open` / `create` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleOutput {
    pub handle: HandleId,
}

/// `read` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutput {
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// `write` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutput {
    pub bytes_written: u32,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessRequest {
    pub path: String,
    pub mode: i32,
}

impl Request for AccessRequest {
    const OPERATION: Operation = Operation::Access;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.access(&paths.resolve_follow(&self.path)?, self.mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChmodRequest {
    pub path: String,
    pub mode: u32,
}

impl Request for ChmodRequest {
    const OPERATION: Operation = Operation::Chmod;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.chmod(&paths.resolve_follow(&self.path)?, self.mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChownRequest {
    pub path: String,
    pub uid: i64,
    pub gid: i64,
}

impl Request for ChownRequest {
    const OPERATION: Operation = Operation::Chown;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        let path = paths.resolve_follow(&self.path)?;
        fs.chown(&path, owner_id(self.uid)?, owner_id(self.gid)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetattrRequest {
    pub path: String,
    #[serde(default)]
    pub fh: Option<HandleId>,
}

impl Request for GetattrRequest {
    const OPERATION: Operation = Operation::Getattr;
    type Response = FileStat;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<FileStat> {
        fs.getattr(&paths.resolve(&self.path)?, self.fh)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaddirRequest {
    pub path: String,
    pub fh: HandleId,
}

impl Request for ReaddirRequest {
    const OPERATION: Operation = Operation::Readdir;
    type Response = ReaddirOutput;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<ReaddirOutput> {
        let listing = fs.readdir(&paths.resolve_follow(&self.path)?, self.fh)?;
        Ok(ReaddirOutput {
            content: listing.collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadlinkRequest {
    pub path: String,
}

impl Request for ReadlinkRequest {
    const OPERATION: Operation = Operation::Readlink;
    type Response = ReadlinkOutput;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<ReadlinkOutput> {
        let destination_path = fs.readlink(&paths.resolve(&self.path)?)?;
        Ok(ReadlinkOutput { destination_path })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MknodRequest {
    pub path: String,
    pub mode: u32,
    pub dev: u64,
}

impl Request for MknodRequest {
    const OPERATION: Operation = Operation::Mknod;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.mknod(&paths.resolve_entry(&self.path)?, self.mode, self.dev)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RmdirRequest {
    pub path: String,
}

impl Request for RmdirRequest {
    const OPERATION: Operation = Operation::Rmdir;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.rmdir(&paths.resolve_entry(&self.path)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MkdirRequest {
    pub path: String,
    pub mode: u32,
}

impl Request for MkdirRequest {
    const OPERATION: Operation = Operation::Mkdir;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.mkdir(&paths.resolve_entry(&self.path)?, self.mode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatfsRequest {
    pub path: String,
}

impl Request for StatfsRequest {
    const OPERATION: Operation = Operation::Statfs;
    type Response = StatVfs;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<StatVfs> {
        fs.statfs(&paths.resolve_follow(&self.path)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnlinkRequest {
    pub path: String,
}

impl Request for UnlinkRequest {
    const OPERATION: Operation = Operation::Unlink;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.unlink(&paths.resolve_entry(&self.path)?)
    }
}

/// `name` is the link to create; `target` is its content, stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymlinkRequest {
    pub name: String,
    pub target: String,
}

impl Request for SymlinkRequest {
    const OPERATION: Operation = Operation::Symlink;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.symlink(&paths.resolve_entry(&self.name)?, &self.target)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameRequest {
    pub old: String,
    pub new: String,
}

impl Request for RenameRequest {
    const OPERATION: Operation = Operation::Rename;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.rename(&paths.resolve_entry(&self.old)?, &paths.resolve_entry(&self.new)?)
    }
}

/// `target` is the existing file; `name` is the new entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkRequest {
    pub target: String,
    pub name: String,
}

impl Request for LinkRequest {
    const OPERATION: Operation = Operation::Link;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.link(&paths.resolve(&self.target)?, &paths.resolve_entry(&self.name)?)
    }
}

/// `times` is `[atime, mtime]` in seconds; absent means "now".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UtimensRequest {
    pub path: String,
    #[serde(default)]
    pub times: Option<(f64, f64)>,
}

impl Request for UtimensRequest {
    const OPERATION: Operation = Operation::Utimens;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        let times = self
            .times
            .map(|(atime, mtime)| -> FsResult<_> {
                Ok((secs_to_system_time(atime)?, secs_to_system_time(mtime)?))
            })
            .transpose()?;
        fs.utimens(&paths.resolve_follow(&self.path)?, times)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRequest {
    pub path: String,
    pub flags: i32,
}

impl Request for OpenRequest {
    const OPERATION: Operation = Operation::Open;
    type Response = HandleOutput;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<HandleOutput> {
        let flags = OpenFlags::from_wire(self.flags)?;
        let handle = fs.open(&paths.resolve_follow(&self.path)?, flags)?;
        Ok(HandleOutput { handle })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRequest {
    pub path: String,
    pub mode: u32,
}

impl Request for CreateRequest {
    const OPERATION: Operation = Operation::Create;
    type Response = HandleOutput;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<HandleOutput> {
        let handle = fs.create(&paths.resolve_follow(&self.path)?, self.mode)?;
        Ok(HandleOutput { handle })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadRequest {
    pub path: String,
    pub size: u32,
    pub offset: u64,
    pub fh: HandleId,
}

impl Request for ReadRequest {
    const OPERATION: Operation = Operation::Read;
    type Response = ReadOutput;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<ReadOutput> {
        let path = paths.resolve(&self.path)?;
        let content = fs.read(&path, self.size, self.offset, self.fh)?;
        Ok(ReadOutput { content })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteRequest {
    pub path: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub offset: u64,
    pub fh: HandleId,
}

impl Request for WriteRequest {
    const OPERATION: Operation = Operation::Write;
    type Response = WriteOutput;

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<WriteOutput> {
        let path = paths.resolve(&self.path)?;
        let bytes_written = fs.write(&path, &self.data, self.offset, self.fh)?;
        Ok(WriteOutput { bytes_written })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TruncateRequest {
    pub path: String,
    pub length: u64,
    #[serde(default)]
    pub fh: Option<HandleId>,
}

impl Request for TruncateRequest {
    const OPERATION: Operation = Operation::Truncate;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.truncate(&paths.resolve_follow(&self.path)?, self.length, self.fh)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlushRequest {
    pub path: String,
    pub fh: HandleId,
}

impl Request for FlushRequest {
    const OPERATION: Operation = Operation::Flush;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.flush(&paths.resolve(&self.path)?, self.fh)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseRequest {
    pub path: String,
    pub fh: HandleId,
}

impl Request for ReleaseRequest {
    const OPERATION: Operation = Operation::Release;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.release(&paths.resolve(&self.path)?, self.fh)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsyncRequest {
    pub path: String,
    pub datasync: i32,
    pub fh: HandleId,
}

impl Request for FsyncRequest {
    const OPERATION: Operation = Operation::Fsync;
    type Response = ();

    fn invoke(self, fs: &dyn FsOps, paths: &dyn PathResolver) -> FsResult<()> {
        fs.fsync(&paths.resolve(&self.path)?, self.datasync != 0, self.fh)
    }
}
