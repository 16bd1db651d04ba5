//! netfs server binary
//!
//! ## Usage
//!
//! ```bash
//! # Export a directory on the default address (127.0.0.1:8000)
//! netfs-server --root /srv/export
//!
//! # Same, from the environment, with NT semantics on a custom port
//! FS_ROOT=/srv/export netfs-server --backend nt --bind 0.0.0.0:9000
//!
//! # From a config file
//! netfs-server --config netfs.toml
//! ```

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use netfs_server::{Cli, Server, ServerConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Server error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig::resolve(cli).context("invalid configuration")?;
    let server = Server::new(&config)?;

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    server
        .run(listener, shutdown_signal())
        .await
        .context("server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
        Err(e) => {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
