//! Server configuration constants.
//!
//! Centralizes defaults so the config file, CLI help, and tests agree.

/// Default listen address (localhost only).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

/// Default route prefix the filesystem is mounted under.
pub const DEFAULT_PREFIX: &str = "/vfs";

/// Default root directory served when none is configured.
pub const DEFAULT_ROOT: &str = ".";

/// Config directory name under the platform config dir.
pub const CONFIG_DIR_NAME: &str = "hostgate";

/// Config file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "server.ron";

/// Service name reported to tracing backends.
pub const SERVICE_NAME: &str = "hostgate-server";

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=info";
