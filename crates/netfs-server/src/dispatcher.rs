//! Server dispatcher.
//!
//! Turns `(operation name, raw body)` into a response envelope: catalogue
//! lookup, schema validation, sandboxed path resolution, one backend call.
//! Protocol and validation failures come back as [`DispatchError`] and
//! never reach the backend; backend failures become error envelopes.

use std::sync::Arc;

use netfs_backend::{Backend, Sandbox};
use netfs_proto::codec::from_json;
use netfs_proto::{
    Envelope, ErrorCode, FsOps, Operation, PathResolver, Request, RequestVisitor,
};
use thiserror::Error;

/// Request rejected before it reached a backend.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid {operation} request: {source}")]
    InvalidRequest {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// Error envelope describing the rejection.
    pub fn envelope(&self) -> Envelope {
        Envelope::failure(self.to_string(), ErrorCode::Protocol)
    }
}

/// Routes requests to one backend under one sandbox.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    sandbox: Sandbox,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend.kind())
            .field("root", &self.sandbox.root())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, sandbox: Sandbox) -> Self {
        Self { backend, sandbox }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Dispatch one call. Blocks on filesystem I/O.
    pub fn dispatch(&self, name: &str, body: &[u8]) -> Result<Envelope, DispatchError> {
        let operation = Operation::from_name(name)
            .ok_or_else(|| DispatchError::UnknownOperation(name.to_string()))?;

        let span = tracing::debug_span!("dispatch", op = operation.name());
        let _enter = span.enter();

        operation.visit(Invoke {
            operation,
            body,
            fs: self.backend.as_fs(),
            paths: &self.sandbox,
        })
    }

    /// Close every handle still open on the backend.
    pub fn close_all(&self) -> usize {
        self.backend.handles().close_all()
    }
}

/// Decode, invoke and wrap a request of whatever type the operation binds.
struct Invoke<'a> {
    operation: Operation,
    body: &'a [u8],
    fs: &'a dyn FsOps,
    paths: &'a dyn PathResolver,
}

impl RequestVisitor for Invoke<'_> {
    type Output = Result<Envelope, DispatchError>;

    fn visit<R: Request>(self) -> Self::Output {
        let request: R = from_json(self.body).map_err(|source| {
            tracing::debug!(error = %source, "rejected request body");
            DispatchError::InvalidRequest {
                operation: self.operation,
                source,
            }
        })?;

        let envelope = match request.invoke(self.fs, self.paths) {
            Ok(response) => Envelope::success(&response)
                .unwrap_or_else(|e| Envelope::failure(e.to_string(), ErrorCode::Other)),
            Err(err) => {
                tracing::debug!(error = %err, code = %err.code(), "backend error");
                Envelope::from_error(&err)
            }
        };
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netfs_backend::{BackendKind, open_backend, sandbox_for};
    use netfs_proto::Status;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(kind: BackendKind) -> (Dispatcher, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(kind).unwrap();
        let sandbox = sandbox_for(kind, dir.path()).unwrap();
        (Dispatcher::new(backend, sandbox), dir)
    }

    fn call(d: &Dispatcher, op: &str, body: serde_json::Value) -> Envelope {
        d.dispatch(op, &serde_json::to_vec(&body).unwrap()).unwrap()
    }

    #[test]
    fn test_unknown_operation() {
        let (d, _dir) = setup(BackendKind::Nt);
        assert!(matches!(
            d.dispatch("frobnicate", b"{}"),
            Err(DispatchError::UnknownOperation(_))
        ));
    }

    #[test]
    fn test_invalid_body_never_reaches_backend() {
        let (d, dir) = setup(BackendKind::Nt);
        let bodies: [&[u8]; 4] = [
            b"not json",
            br#"{"path":"/d"}"#,
            br#"{"path":"/d","mode":493,"extra":true}"#,
            br#"{"path":"/d","mode":"493"}"#,
        ];
        for body in bodies {
            assert!(matches!(
                d.dispatch("mkdir", body),
                Err(DispatchError::InvalidRequest { .. })
            ));
        }
        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn test_bad_base64_is_validation_error() {
        let (d, _dir) = setup(BackendKind::Nt);
        let body = br#"{"path":"/f","data":"%%%","offset":0,"fh":1}"#;
        assert!(matches!(
            d.dispatch("write", body),
            Err(DispatchError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_backend_error_becomes_envelope() {
        let (d, _dir) = setup(BackendKind::Nt);
        let env = call(&d, "open", json!({"path": "/missing", "flags": 0}));
        assert_eq!(env.status(), Status::Error);
        assert_eq!(env.code(), Some(ErrorCode::NotFound));
        assert!(env.data().is_null());
    }

    #[test]
    fn test_escape_is_refused() {
        let (d, _dir) = setup(BackendKind::Nt);
        let env = call(&d, "mkdir", json!({"path": "/../escaped", "mode": 0o755}));
        assert_eq!(env.code(), Some(ErrorCode::PathEscapesRoot));
    }

    #[test]
    fn test_create_write_release_open_read() {
        let (d, dir) = setup(BackendKind::Nt);
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let fh = call(&d, "create", json!({"path": "/a/b.txt", "mode": 0o644}))
            .into_result::<netfs_proto::schema::HandleOutput>()
            .unwrap()
            .handle;
        let written = call(&d, "write", json!({"path": "/a/b.txt", "data": "aGk=", "offset": 0, "fh": fh}))
            .into_result::<netfs_proto::schema::WriteOutput>()
            .unwrap();
        assert_eq!(written.bytes_written, 2);
        call(&d, "release", json!({"path": "/a/b.txt", "fh": fh}))
            .into_result::<()>()
            .unwrap();

        let fh2 = call(&d, "open", json!({"path": "/a/b.txt", "flags": 0}))
            .into_result::<netfs_proto::schema::HandleOutput>()
            .unwrap()
            .handle;
        let read = call(&d, "read", json!({"path": "/a/b.txt", "size": 2, "offset": 0, "fh": fh2}))
            .into_result::<netfs_proto::schema::ReadOutput>()
            .unwrap();
        assert_eq!(read.content, b"hi");

        assert_eq!(d.close_all(), 1);
    }

    #[test]
    fn test_release_twice_is_bad_handle() {
        let (d, _dir) = setup(BackendKind::Nt);
        let fh = call(&d, "create", json!({"path": "/f", "mode": 0o644}))
            .into_result::<netfs_proto::schema::HandleOutput>()
            .unwrap()
            .handle;
        call(&d, "release", json!({"path": "/f", "fh": fh}))
            .into_result::<()>()
            .unwrap();
        let env = call(&d, "release", json!({"path": "/f", "fh": fh}));
        assert_eq!(env.code(), Some(ErrorCode::BadHandle));
    }

    #[test]
    fn test_readdir_lists_children() {
        let (d, dir) = setup(BackendKind::Nt);
        std::fs::write(dir.path().join("one"), b"").unwrap();
        std::fs::create_dir(dir.path().join("two")).unwrap();

        let listing = call(&d, "readdir", json!({"path": "/", "fh": 0}))
            .into_result::<netfs_proto::schema::ReaddirOutput>()
            .unwrap();
        let mut names = listing.content;
        names.sort();
        assert_eq!(names, [".", "..", "one", "two"]);
    }

    #[test]
    fn test_reserved_name_rejected_through_dispatch() {
        let (d, dir) = setup(BackendKind::Nt);
        let env = call(&d, "create", json!({"path": "/CON.txt", "mode": 0o644}));
        assert_eq!(env.code(), Some(ErrorCode::InvalidArgument));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn backend_kinds() -> Vec<BackendKind> {
        let mut kinds = vec![BackendKind::Nt];
        if cfg!(unix) {
            kinds.push(BackendKind::Posix);
        }
        kinds
    }

    #[cfg(unix)]
    #[test]
    fn test_final_symlink_out_of_root_is_refused() {
        use std::os::unix::fs::symlink;

        for kind in backend_kinds() {
            let (d, dir) = setup(kind);
            let outside = TempDir::new().unwrap();
            let secret = outside.path().join("secret");
            std::fs::write(&secret, b"s3cret").unwrap();
            symlink(&secret, dir.path().join("link")).unwrap();
            symlink(outside.path(), dir.path().join("dirlink")).unwrap();
            symlink(outside.path().join("planted"), dir.path().join("dangling")).unwrap();

            let calls = [
                ("open", json!({"path": "/link", "flags": 2})),
                ("chmod", json!({"path": "/link", "mode": 0o777})),
                ("chown", json!({"path": "/link", "uid": -1, "gid": -1})),
                ("access", json!({"path": "/link", "mode": 0})),
                ("truncate", json!({"path": "/link", "length": 0})),
                ("utimens", json!({"path": "/link", "times": [1.0, 2.0]})),
                ("readdir", json!({"path": "/dirlink", "fh": 0})),
                ("statfs", json!({"path": "/dirlink"})),
                ("create", json!({"path": "/dangling", "mode": 0o644})),
                ("open", json!({"path": "/dangling", "flags": 0o102})),
            ];
            for (op, body) in calls {
                let env = call(&d, op, body);
                assert_eq!(env.code(), Some(ErrorCode::PathEscapesRoot), "{kind} {op}");
            }

            assert_eq!(std::fs::read(&secret).unwrap(), b"s3cret");
            assert!(!outside.path().join("planted").exists());
            assert!(d.backend().handles().is_empty());

            // Calls that act on the link itself still work.
            call(&d, "getattr", json!({"path": "/link"}))
                .into_result::<netfs_proto::FileStat>()
                .unwrap();
            call(&d, "unlink", json!({"path": "/link"}))
                .into_result::<()>()
                .unwrap();
            assert!(secret.exists());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_final_symlink_inside_root_is_followed() {
        for kind in backend_kinds() {
            let (d, dir) = setup(kind);
            std::fs::write(dir.path().join("real"), b"0123456789").unwrap();
            std::os::unix::fs::symlink("real", dir.path().join("alias")).unwrap();

            call(&d, "truncate", json!({"path": "/alias", "length": 4}))
                .into_result::<()>()
                .unwrap();
            assert_eq!(std::fs::read(dir.path().join("real")).unwrap(), b"0123");
            assert!(
                std::fs::symlink_metadata(dir.path().join("alias"))
                    .unwrap()
                    .file_type()
                    .is_symlink(),
                "{kind}"
            );
        }
    }

    #[test]
    fn test_root_entry_cannot_be_changed() {
        for kind in backend_kinds() {
            let (d, dir) = setup(kind);
            std::fs::create_dir(dir.path().join("sub")).unwrap();

            let calls = [
                ("rmdir", json!({"path": "/"})),
                ("unlink", json!({"path": "/"})),
                ("mkdir", json!({"path": "/", "mode": 0o755})),
                ("rename", json!({"old": "/", "new": "/sub/moved"})),
                ("rename", json!({"old": "/sub", "new": "/."})),
                ("rmdir", json!({"path": "/sub/.."})),
            ];
            for (op, body) in calls {
                let env = call(&d, op, body);
                assert_eq!(env.code(), Some(ErrorCode::PermissionDenied), "{kind} {op}");
            }

            assert!(dir.path().is_dir());
            assert!(dir.path().join("sub").is_dir());
        }
    }
}
