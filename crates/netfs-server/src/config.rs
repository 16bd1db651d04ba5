//! Server configuration.
//!
//! Values come from an optional TOML file, then command-line flags (which
//! also read `FS_ROOT` / `NETFS_BIND`), then built-in defaults.
//!
//! ```toml
//! root = "/srv/export"
//! bind = "0.0.0.0:8000"
//! backend = "posix"
//! max_body_bytes = 67108864
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use netfs_backend::BackendKind;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{BIND_ENV, DEFAULT_BIND_ADDRESS, DEFAULT_MAX_BODY_BYTES, ROOT_ENV};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no root directory configured (use --root or FS_ROOT)")]
    MissingRoot,

    #[error("invalid default bind address: {0}")]
    Bind(#[from] std::net::AddrParseError),

    #[error("unusable root directory {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: netfs_proto::FsError,
    },

    #[error("backend unavailable: {0}")]
    Backend(#[source] netfs_proto::FsError),
}

/// netfs-server - export a directory as a network filesystem over HTTP
#[derive(Debug, Default, Parser)]
#[command(name = "netfs-server", version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory to export
    #[arg(long, env = ROOT_ENV)]
    pub root: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = BIND_ENV)]
    pub bind: Option<SocketAddr>,

    /// Backend semantics: posix or nt
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Maximum request body size in bytes
    #[arg(long)]
    pub max_body_bytes: Option<usize>,
}

/// Config file contents. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub root: Option<PathBuf>,
    pub bind: Option<SocketAddr>,
    pub backend: Option<BackendKind>,
    pub max_body_bytes: Option<usize>,
}

impl FileConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Exported directory.
    pub root: PathBuf,
    pub bind: SocketAddr,
    pub backend: BackendKind,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Configuration with defaults for everything but the root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self {
            root: root.into(),
            bind: DEFAULT_BIND_ADDRESS.parse()?,
            backend: BackendKind::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Merge command-line flags over the config file (if any) over defaults.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let root = cli.root.or(file.root).ok_or(ConfigError::MissingRoot)?;
        let mut config = Self::new(root)?;
        if let Some(bind) = cli.bind.or(file.bind) {
            config.bind = bind;
        }
        if let Some(backend) = cli.backend.or(file.backend) {
            config.backend = backend;
        }
        if let Some(max) = cli.max_body_bytes.or(file.max_body_bytes) {
            config.max_body_bytes = max;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("/srv").unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:8000");
        assert_eq!(config.max_body_bytes, 64 * 1024 * 1024);
        assert_eq!(config.backend, BackendKind::default());
    }

    #[test]
    fn test_cli_flags_parse() {
        let cli = Cli::try_parse_from([
            "netfs-server",
            "--root",
            "/srv/export",
            "--bind",
            "0.0.0.0:9000",
            "--backend",
            "nt",
        ])
        .unwrap();
        assert_eq!(cli.root.as_deref(), Some(Path::new("/srv/export")));
        assert_eq!(cli.backend, Some(BackendKind::Nt));

        let config = ServerConfig::merge(cli, FileConfig::default()).unwrap();
        assert_eq!(config.bind.port(), 9000);
    }

    #[test]
    fn test_bad_backend_flag_rejected() {
        assert!(Cli::try_parse_from(["netfs-server", "--backend", "fat32"]).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("netfs.toml");
        std::fs::write(
            &path,
            "root = \"/from/file\"\nbind = \"127.0.0.1:7000\"\nbackend = \"nt\"\n",
        )
        .unwrap();

        let cli = Cli {
            config: Some(path),
            root: Some(PathBuf::from("/from/cli")),
            ..Default::default()
        };
        let config = ServerConfig::resolve(cli).unwrap();
        assert_eq!(config.root, PathBuf::from("/from/cli"));
        assert_eq!(config.bind.port(), 7000);
        assert_eq!(config.backend, BackendKind::Nt);
    }

    #[test]
    fn test_missing_root() {
        assert!(matches!(
            ServerConfig::merge(Cli::default(), FileConfig::default()),
            Err(ConfigError::MissingRoot)
        ));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("netfs.toml");
        std::fs::write(&path, "rooot = \"/typo\"\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::resolve(cli),
            Err(ConfigError::Read { .. })
        ));
    }
}
