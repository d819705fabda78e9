//! # Prezenta Common
//!
//! Shared plumbing for the Prezenta offline worker crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Worker configuration (cache version, manifest, origin, store backend)

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{StoreConfig, WorkerConfig, DEFAULT_CACHE_VERSION, DEFAULT_MANIFEST};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ConfigError {
    /// Create a validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_error_message() {
        let err = ConfigError::invalid("cache_version is empty");
        assert_eq!(err.to_string(), "Invalid config: cache_version is empty");
    }
}
