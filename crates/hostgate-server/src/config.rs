//! Server configuration.
//!
//! Loaded from a RON file; every field is optional and falls back to the
//! values in [`crate::constants`].
//!
//! ```ron
//! (
//!     bind: "0.0.0.0:8080",
//!     root: "/srv/share",
//!     prefix: "/vfs",
//!     public_url: Some("https://files.example.com"),
//!     buffer_size: 65536,
//!     delete_retry: (attempts: 3, delay_ms: 250),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use hostgate_vfs::{
    DEFAULT_BUFFER_SIZE, DEFAULT_DELETE_ATTEMPTS, DEFAULT_DELETE_RETRY_DELAY, PathResolver,
    RetryPolicy, SafeFs, VfsHandler,
};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_BIND_ADDRESS, DEFAULT_PREFIX, DEFAULT_ROOT,
};

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Delete retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for DeleteRetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_DELETE_ATTEMPTS,
            delay_ms: DEFAULT_DELETE_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl From<DeleteRetryConfig> for RetryPolicy {
    fn from(cfg: DeleteRetryConfig) -> Self {
        RetryPolicy::new(cfg.attempts, Duration::from_millis(cfg.delay_ms))
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
    /// Directory exposed through the gateway.
    pub root: PathBuf,
    /// Route prefix, e.g. `/vfs`. Empty mounts at the site root.
    pub prefix: String,
    /// Public base URL for absolute links, for deployments behind a proxy.
    pub public_url: Option<String>,
    /// Transfer chunk size in bytes.
    pub buffer_size: usize,
    /// Delete retry schedule.
    pub delete_retry: DeleteRetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND_ADDRESS.to_string(),
            root: PathBuf::from(DEFAULT_ROOT),
            prefix: DEFAULT_PREFIX.to_string(),
            public_url: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            delete_retry: DeleteRetryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default config file path (`~/.config/hostgate/server.ron` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Parse from RON text. `origin` is only used in error messages.
    pub fn from_ron(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        ron::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text, path)
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// the built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading default config");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Check values that would otherwise fail at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive".into()));
        }
        if self.delete_retry.attempts == 0 {
            return Err(ConfigError::Invalid(
                "delete_retry.attempts must be at least 1".into(),
            ));
        }
        if !self.prefix.is_empty() && !self.prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "prefix must start with '/': {:?}",
                self.prefix
            )));
        }
        if self.prefix.contains(['{', '}', '*']) {
            return Err(ConfigError::Invalid(format!(
                "prefix may not contain route syntax: {:?}",
                self.prefix
            )));
        }
        if !self.root.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Build the protocol handler this configuration describes.
    pub fn handler(&self) -> VfsHandler {
        let mut resolver = PathResolver::new(&self.root, &self.prefix);
        if let Some(url) = &self.public_url {
            resolver = resolver.with_public_url(url.as_str());
        }
        VfsHandler::new(resolver, SafeFs::new(self.delete_retry.into()))
            .with_buffer_size(self.buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg = ServerConfig::from_ron(
            r#"(root: "/srv/share", delete_retry: (attempts: 5))"#,
            Path::new("test.ron"),
        )
        .unwrap();
        assert_eq!(cfg.root, PathBuf::from("/srv/share"));
        assert_eq!(cfg.bind, DEFAULT_BIND_ADDRESS);
        assert_eq!(cfg.prefix, DEFAULT_PREFIX);
        assert_eq!(cfg.delete_retry.attempts, 5);
        assert_eq!(cfg.delete_retry.delay_ms, 250);
        assert!(cfg.public_url.is_none());
    }

    #[test]
    fn test_public_url_parses() {
        let cfg = ServerConfig::from_ron(
            r#"(public_url: Some("https://files.example.com"))"#,
            Path::new("test.ron"),
        )
        .unwrap();
        assert_eq!(cfg.public_url.as_deref(), Some("https://files.example.com"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = ServerConfig::from_ron("(bind: 42", Path::new("broken.ron")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.ron"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.ron");
        std::fs::write(&path, r#"(bind: "0.0.0.0:9000", buffer_size: 4096)"#).unwrap();

        let cfg = ServerConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:9000");
        assert_eq!(cfg.buffer_size, 4096);

        let missing = dir.path().join("nope.ron");
        assert!(matches!(
            ServerConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_validate() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ServerConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());

        cfg.prefix = "vfs".into();
        assert!(cfg.validate().is_err());
        cfg.prefix = String::new();
        assert!(cfg.validate().is_ok());

        cfg.buffer_size = 0;
        assert!(cfg.validate().is_err());
        cfg.buffer_size = 1024;

        cfg.root = dir.path().join("missing");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_handler_uses_prefix() {
        let dir = TempDir::new().unwrap();
        let cfg = ServerConfig {
            root: dir.path().to_path_buf(),
            prefix: "/files/".into(),
            ..Default::default()
        };
        let handler = cfg.handler();
        assert_eq!(handler.resolver().prefix(), "/files");
    }
}
