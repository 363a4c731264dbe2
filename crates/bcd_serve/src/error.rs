//! Error types for serving.

use bcd_core::BcdError;
use thiserror::Error;

/// Result type for serving operations.
pub type Result<T> = std::result::Result<T, ServeError>;

/// Errors raised while configuring or running the server.
#[derive(Error, Debug)]
pub enum ServeError {
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem or socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparseable bind address.
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// Pipeline error.
    #[error(transparent)]
    Bcd(#[from] BcdError),

    /// Task or runtime failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
