//! HTTP surface: `POST /{operation}` and `GET /health`.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use netfs_proto::{Envelope, ErrorCode};
use tower_http::trace::TraceLayer;

use crate::dispatcher::{DispatchError, Dispatcher};

/// Build the router over a shared dispatcher.
pub fn router(dispatcher: Arc<Dispatcher>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/:operation", post(call))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn health() -> Response {
    envelope_response(StatusCode::OK, Envelope::success(&()).ok())
}

async fn call(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path(operation): Path<String>,
    body: Bytes,
) -> Response {
    let outcome =
        tokio::task::spawn_blocking(move || dispatcher.dispatch(&operation, &body)).await;

    match outcome {
        Ok(Ok(envelope)) => envelope_response(StatusCode::OK, Some(envelope)),
        Ok(Err(err)) => {
            let status = match err {
                DispatchError::UnknownOperation(_) => StatusCode::NOT_FOUND,
                DispatchError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            };
            envelope_response(status, Some(err.envelope()))
        }
        Err(e) => {
            tracing::error!(error = %e, "dispatch task failed");
            envelope_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(Envelope::failure("internal server error", ErrorCode::Other)),
            )
        }
    }
}

fn envelope_response(status: StatusCode, envelope: Option<Envelope>) -> Response {
    match envelope {
        Some(envelope) => (status, Json(envelope)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use netfs_backend::{BackendKind, open_backend, sandbox_for};
    use netfs_proto::Status;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn setup() -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(BackendKind::Nt).unwrap();
        let sandbox = sandbox_for(BackendKind::Nt, dir.path()).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(backend, sandbox));
        (router(dispatcher, 1024), dir)
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Envelope) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = setup();
        let (status, env) = send(app, Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(env.status(), Status::Success);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_with_envelope() {
        let (app, _dir) = setup();
        let (status, env) = send(app, Method::POST, "/frobnicate", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(env.status(), Status::Error);
        assert!(env.error().unwrap().contains("frobnicate"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_400() {
        let (app, _dir) = setup();
        let (status, env) = send(app, Method::POST, "/unlink", r#"{"pth":"/x"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(env.code(), Some(ErrorCode::Protocol));
    }

    #[tokio::test]
    async fn test_backend_failure_is_200_error_envelope() {
        let (app, _dir) = setup();
        let (status, env) = send(app, Method::POST, "/unlink", r#"{"path":"/nope"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(env.code(), Some(ErrorCode::NotFound));
        assert!(env.data().is_null());
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let (app, dir) = setup();
        let (status, env) =
            send(app, Method::POST, "/mkdir", r#"{"path":"/sub","mode":493}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(env.is_success());
        assert!(env.error().is_none());
        assert!(dir.path().join("sub").is_dir());
    }

    #[tokio::test]
    async fn test_body_limit() {
        let (app, _dir) = setup();
        let big = format!(r#"{{"path":"/{}"}}"#, "x".repeat(4096));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/unlink")
            .body(Body::from(big))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
