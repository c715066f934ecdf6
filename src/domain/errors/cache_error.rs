//! Cache store error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Key is empty after sanitization.
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Network error while creating a client.
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl CacheError {
    /// Wraps an I/O error with context.
    #[must_use]
    pub fn io(context: &str, error: &std::io::Error) -> Self {
        Self::IoError(format!("{context}: {error}"))
    }
}
