//! netfs client adapter
//!
//! [`HttpFs`] implements [`netfs_proto::FsOps`] by forwarding every call to
//! a netfs server. A kernel-facing adapter drives it with virtual paths
//! (`/dir/file`) and turns failures into errno values with
//! [`FsError::errno`](netfs_proto::FsError::errno).

pub mod config;
pub mod http_fs;

pub use config::ClientConfig;
pub use http_fs::{ClientError, HttpFs};
