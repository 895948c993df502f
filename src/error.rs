//! Error types for Webtap

use std::io;
use thiserror::Error;

/// Result type for Webtap operations
pub type Result<T> = std::result::Result<T, WebtapError>;

/// Errors that can occur in Webtap
#[derive(Debug, Error)]
pub enum WebtapError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Session is not in the expected state
    #[error("Session error: {0}")]
    SessionError(String),

    /// No navigation host is available to attach to
    #[error("No navigation host present")]
    NoHost,

    /// Body exceeds the configured persistence limit
    #[error("Body too large: {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge {
        /// Actual size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Archive serialization failure
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}
