//! hostgate server library
//!
//! Configuration and the axum router that serves a [`hostgate_vfs::VfsHandler`].

pub mod config;
pub mod constants;
pub mod routes;

pub use config::{ConfigError, DeleteRetryConfig, ServerConfig};
pub use routes::{AppState, router};
