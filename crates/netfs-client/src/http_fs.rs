//! Client adapter: one HTTP round trip per filesystem operation.
//!
//! Each [`FsOps`] method builds the operation's request body, posts it to
//! `/<operation>` and unwraps the envelope. Envelopes carry an error
//! category, so a server-side "not found" comes back as
//! [`FsError::NotFound`] rather than a generic failure. Anything that keeps
//! a well-formed envelope from arriving is [`FsError::Transport`].

use std::path::Path;
use std::time::SystemTime;

use netfs_proto::codec::system_time_to_secs;
use netfs_proto::schema::{
    AccessRequest, ChmodRequest, ChownRequest, CreateRequest, FlushRequest, FsyncRequest,
    GetattrRequest, LinkRequest, MkdirRequest, MknodRequest, OpenRequest, ReadRequest,
    ReaddirRequest, ReadlinkRequest, ReleaseRequest, RenameRequest, RmdirRequest,
    StatfsRequest, SymlinkRequest, TruncateRequest, UnlinkRequest, UtimensRequest,
    WriteRequest,
};
use netfs_proto::{
    DirListing, Envelope, FileStat, FsError, FsOps, FsResult, HandleId, OpenFlags, Request,
    StatVfs,
};
use reqwest::blocking::Client;
use thiserror::Error;

use crate::config::ClientConfig;

/// Failure to set up a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("server at {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server at {url} failed its health check: {source}")]
    Unhealthy {
        url: String,
        #[source]
        source: FsError,
    },
}

/// Remote filesystem reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFs {
    http: Client,
    config: ClientConfig,
}

impl HttpFs {
    /// Build a client without contacting the server.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self { http, config })
    }

    /// Build a client and check that the server answers `/health`.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let fs = Self::new(config)?;
        let url = format!("{}/health", fs.config.endpoint());

        let response = fs
            .http
            .get(&url)
            .send()
            .map_err(|source| ClientError::Unreachable {
                url: url.clone(),
                source,
            })?;
        let envelope: Envelope = response.json().map_err(|source| ClientError::Unreachable {
            url: url.clone(),
            source,
        })?;
        envelope
            .into_result::<()>()
            .map_err(|source| ClientError::Unhealthy {
                url: url.clone(),
                source,
            })?;

        tracing::debug!(%url, "connected");
        Ok(fs)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open with host `open(2)` flags, translated into the wire encoding.
    pub fn open_host(&self, path: &Path, host_flags: i32) -> FsResult<HandleId> {
        self.open(path, OpenFlags::from_host(host_flags)?)
    }

    /// Post one request and unwrap its envelope.
    fn call<R: Request>(&self, request: &R) -> FsResult<R::Response> {
        let name = R::OPERATION.name();
        let url = format!("{}/{}", self.config.endpoint(), name);

        let response = self.http.post(&url).json(request).send().map_err(|e| {
            tracing::debug!(op = name, error = %e, "request failed");
            FsError::Transport(format!("{name}: {e}"))
        })?;

        let status = response.status();
        let envelope: Envelope = response.json().map_err(|e| {
            FsError::Transport(format!("{name}: unreadable response (HTTP {status}): {e}"))
        })?;

        envelope.into_result()
    }
}

/// Virtual path as sent on the wire.
fn wire_path(path: &Path) -> FsResult<String> {
    let text = path
        .to_str()
        .ok_or_else(|| FsError::invalid_argument(format!("non-UTF-8 path: {}", path.display())))?;
    if cfg!(windows) {
        Ok(text.replace('\\', "/"))
    } else {
        Ok(text.to_string())
    }
}

/// `None` travels as -1, which the server reads as "leave unchanged".
fn wire_owner(id: Option<u32>) -> i64 {
    id.map_or(-1, i64::from)
}

impl FsOps for HttpFs {
    fn access(&self, path: &Path, mode: i32) -> FsResult<()> {
        self.call(&AccessRequest {
            path: wire_path(path)?,
            mode,
        })
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.call(&ChmodRequest {
            path: wire_path(path)?,
            mode,
        })
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.call(&ChownRequest {
            path: wire_path(path)?,
            uid: wire_owner(uid),
            gid: wire_owner(gid),
        })
    }

    fn getattr(&self, path: &Path, fh: Option<HandleId>) -> FsResult<FileStat> {
        self.call(&GetattrRequest {
            path: wire_path(path)?,
            fh,
        })
    }

    fn readdir(&self, path: &Path, fh: HandleId) -> FsResult<DirListing> {
        let output = self.call(&ReaddirRequest {
            path: wire_path(path)?,
            fh,
        })?;
        Ok(DirListing::from_wire(output.content))
    }

    fn readlink(&self, path: &Path) -> FsResult<String> {
        let output = self.call(&ReadlinkRequest {
            path: wire_path(path)?,
        })?;
        Ok(output.destination_path)
    }

    fn statfs(&self, path: &Path) -> FsResult<StatVfs> {
        self.call(&StatfsRequest {
            path: wire_path(path)?,
        })
    }

    fn utimens(&self, path: &Path, times: Option<(SystemTime, SystemTime)>) -> FsResult<()> {
        self.call(&UtimensRequest {
            path: wire_path(path)?,
            times: times.map(|(atime, mtime)| {
                (system_time_to_secs(atime), system_time_to_secs(mtime))
            }),
        })
    }

    fn mknod(&self, path: &Path, mode: u32, dev: u64) -> FsResult<()> {
        self.call(&MknodRequest {
            path: wire_path(path)?,
            mode,
            dev,
        })
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.call(&MkdirRequest {
            path: wire_path(path)?,
            mode,
        })
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        self.call(&RmdirRequest {
            path: wire_path(path)?,
        })
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        self.call(&UnlinkRequest {
            path: wire_path(path)?,
        })
    }

    fn symlink(&self, name: &Path, target: &str) -> FsResult<()> {
        self.call(&SymlinkRequest {
            name: wire_path(name)?,
            target: target.to_string(),
        })
    }

    fn rename(&self, old: &Path, new: &Path) -> FsResult<()> {
        self.call(&RenameRequest {
            old: wire_path(old)?,
            new: wire_path(new)?,
        })
    }

    fn link(&self, target: &Path, name: &Path) -> FsResult<()> {
        self.call(&LinkRequest {
            target: wire_path(target)?,
            name: wire_path(name)?,
        })
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<HandleId> {
        let output = self.call(&OpenRequest {
            path: wire_path(path)?,
            flags: flags.to_wire(),
        })?;
        Ok(output.handle)
    }

    fn create(&self, path: &Path, mode: u32) -> FsResult<HandleId> {
        let output = self.call(&CreateRequest {
            path: wire_path(path)?,
            mode,
        })?;
        Ok(output.handle)
    }

    fn read(&self, path: &Path, size: u32, offset: u64, fh: HandleId) -> FsResult<Vec<u8>> {
        let output = self.call(&ReadRequest {
            path: wire_path(path)?,
            size,
            offset,
            fh,
        })?;
        Ok(output.content)
    }

    fn write(&self, path: &Path, data: &[u8], offset: u64, fh: HandleId) -> FsResult<u32> {
        let output = self.call(&WriteRequest {
            path: wire_path(path)?,
            data: data.to_vec(),
            offset,
            fh,
        })?;
        Ok(output.bytes_written)
    }

    fn truncate(&self, path: &Path, length: u64, fh: Option<HandleId>) -> FsResult<()> {
        self.call(&TruncateRequest {
            path: wire_path(path)?,
            length,
            fh,
        })
    }

    fn flush(&self, path: &Path, fh: HandleId) -> FsResult<()> {
        self.call(&FlushRequest {
            path: wire_path(path)?,
            fh,
        })
    }

    fn release(&self, path: &Path, fh: HandleId) -> FsResult<()> {
        self.call(&ReleaseRequest {
            path: wire_path(path)?,
            fh,
        })
    }

    fn fsync(&self, path: &Path, datasync: bool, fh: HandleId) -> FsResult<()> {
        self.call(&FsyncRequest {
            path: wire_path(path)?,
            datasync: i32::from(datasync),
            fh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    /// Address of a port nothing listens on.
    fn dead_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn offline_client() -> HttpFs {
        let config = ClientConfig::new(dead_endpoint()).with_timeout(Duration::from_secs(2));
        HttpFs::new(config).unwrap()
    }

    #[test]
    fn test_connect_unreachable() {
        let config = ClientConfig::new(dead_endpoint()).with_timeout(Duration::from_secs(2));
        assert!(matches!(
            HttpFs::connect(config),
            Err(ClientError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_transport_failure_maps_to_comm_errno() {
        let fs = offline_client();
        let err = fs.getattr(Path::new("/x"), None).unwrap_err();
        assert!(matches!(err, FsError::Transport(_)));
        if cfg!(target_os = "linux") {
            assert_eq!(err.errno(), libc::ECOMM);
        }
    }

    #[test]
    fn test_open_host_rejects_bad_access_mode_locally() {
        let fs = offline_client();
        // O_ACCMODE with both bits set is not a valid access mode.
        let err = fs.open_host(Path::new("/x"), 3).unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[test]
    fn test_wire_owner() {
        assert_eq!(wire_owner(None), -1);
        assert_eq!(wire_owner(Some(1000)), 1000);
        assert_eq!(wire_owner(Some(u32::MAX)), i64::from(u32::MAX));
    }

    #[test]
    fn test_wire_path() {
        assert_eq!(wire_path(Path::new("/a/b.txt")).unwrap(), "/a/b.txt");
    }

    #[cfg(unix)]
    #[test]
    fn test_wire_path_rejects_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"/bad\xff"));
        assert!(matches!(wire_path(path), Err(FsError::InvalidArgument(_))));
    }
}
