//! # netfs-backend
//!
//! Local filesystem backends that execute netfs operations under a root.
//!
//! - [`Sandbox`] - resolves client virtual paths, refusing escapes
//! - [`HandleRegistry`] - open files issued by `open`/`create`
//! - [`PosixBackend`] - direct POSIX passthrough (unix hosts)
//! - [`NtBackend`] - Windows-NT semantics, runnable on any host
//!
//! Backends receive paths that the sandbox already resolved; they never
//! see a virtual path.

mod common;
pub mod handles;
pub mod nt;
#[cfg(unix)]
pub mod posix;
pub mod sandbox;

use std::sync::Arc;

use netfs_proto::FsOps;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use handles::{HandleRegistry, OpenHandle};
pub use nt::NtBackend;
#[cfg(unix)]
pub use posix::PosixBackend;
pub use sandbox::Sandbox;

/// Which platform semantics a server runs with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Posix,
    Nt,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(windows) { Self::Nt } else { Self::Posix }
    }
}

impl BackendKind {
    /// Whether virtual paths may carry an alternate data stream suffix.
    pub fn allows_streams(self) -> bool {
        self == Self::Nt
    }
}

/// A backend as the server holds it: the operations plus the handle
/// registry it owns.
pub trait Backend: FsOps {
    fn kind(&self) -> BackendKind;

    fn handles(&self) -> &HandleRegistry;

    fn as_fs(&self) -> &dyn FsOps;
}

/// Build a backend of the given kind.
pub fn open_backend(kind: BackendKind) -> netfs_proto::FsResult<Arc<dyn Backend>> {
    match kind {
        #[cfg(unix)]
        BackendKind::Posix => Ok(Arc::new(PosixBackend::new())),
        #[cfg(not(unix))]
        BackendKind::Posix => Err(netfs_proto::FsError::unsupported(
            "posix backend on a non-unix host",
        )),
        BackendKind::Nt => Ok(Arc::new(NtBackend::new())),
    }
}

/// Build the sandbox matching a backend kind.
pub fn sandbox_for(kind: BackendKind, root: &std::path::Path) -> netfs_proto::FsResult<Sandbox> {
    let sandbox = Sandbox::new(root)?;
    Ok(if kind.allows_streams() {
        sandbox.with_streams()
    } else {
        sandbox
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("posix".parse::<BackendKind>().unwrap(), BackendKind::Posix);
        assert_eq!("NT".parse::<BackendKind>().unwrap(), BackendKind::Nt);
        assert!("fat32".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Nt.to_string(), "nt");
    }

    #[test]
    fn test_open_backend_reports_kind() {
        let backend = open_backend(BackendKind::Nt).unwrap();
        assert_eq!(backend.kind(), BackendKind::Nt);
        assert!(backend.handles().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_default_kind_on_unix() {
        assert_eq!(BackendKind::default(), BackendKind::Posix);
    }
}
