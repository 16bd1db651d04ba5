//! Server configuration constants.

/// Default listen address (localhost only; the protocol is unauthenticated).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";

/// Default request body limit. Large enough for a 48 MiB write after base64.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Environment variable naming the exported root directory.
pub const ROOT_ENV: &str = "FS_ROOT";

/// Environment variable naming the listen address.
pub const BIND_ENV: &str = "NETFS_BIND";
