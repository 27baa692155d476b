//! services/api/src/error.rs
//!
//! Failures that stop the server from starting or keep it from serving.
//! Per-request failures are answered over the socket or as HTTP status codes
//! and never reach this type.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The environment did not describe a runnable server.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting to PostgreSQL or migrating it failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Binding the listener or serving connections failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
