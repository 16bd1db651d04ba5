//! netfs server library
//!
//! Exports one directory over the netfs protocol: every catalogue operation
//! is a `POST /<operation>` route dispatched to a sandboxed backend.

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod http;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use netfs_backend::{open_backend, sandbox_for};
use tokio::net::TcpListener;

pub use config::{Cli, ConfigError, FileConfig, ServerConfig};
pub use dispatcher::{DispatchError, Dispatcher};

/// A configured server, ready to accept connections.
#[derive(Debug)]
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
}

impl Server {
    /// Open the backend and sandbox the configured root.
    pub fn new(config: &ServerConfig) -> Result<Self, ConfigError> {
        let backend = open_backend(config.backend).map_err(ConfigError::Backend)?;
        let sandbox =
            sandbox_for(config.backend, &config.root).map_err(|source| ConfigError::Root {
                path: config.root.clone(),
                source,
            })?;

        tracing::info!(
            root = %sandbox.root().display(),
            backend = %config.backend,
            "exporting directory"
        );

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(backend, sandbox)),
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Router over this server's dispatcher.
    pub fn router(&self) -> Router {
        http::router(Arc::clone(&self.dispatcher), self.max_body_bytes)
    }

    /// Serve on `listener` until `shutdown` resolves, then close every
    /// handle still open.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "listening");
        }

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        let closed = self.dispatcher.close_all();
        tracing::info!(closed, "server stopped");
        result
    }
}
