//! # netfs-proto
//!
//! Shared protocol for netfs, a network filesystem spoken as JSON over HTTP.
//!
//! - [`catalogue`] - the operation table every other layer is driven from
//! - [`schema`] - typed request and response bodies
//! - [`envelope`] - the uniform `{status, error, data}` response wrapper
//! - [`codec`] - base64 content and timestamp conversion
//! - [`FsOps`] - the operation trait shared by backends and the client
//!
//! ## Wire conventions
//!
//! - One `POST /<operation>` per call, JSON body in, JSON envelope out.
//! - File content is base64; timestamps are fractional epoch seconds.
//! - Open flags and mode bits use Linux numeric values on every host.

pub mod catalogue;
pub mod codec;
pub mod envelope;
mod error;
pub mod flags;
mod ops;
pub mod schema;

pub use catalogue::{CATALOGUE, Operation, OperationDescriptor, RequestVisitor, lookup};
pub use envelope::{Envelope, Status};
pub use error::{ErrorCode, FsError, FsResult};
pub use flags::OpenFlags;
pub use ops::{DirListing, FsOps, HandleId};
pub use schema::{FileStat, PathResolver, Request, StatVfs};
