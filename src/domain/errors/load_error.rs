//! Request-level error types.

use thiserror::Error;

/// Why an image request could not produce an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timed out waiting for HTTP response headers")]
    HttpHeadersTimeout,

    #[error("timed out reading HTTP response body")]
    HttpReadTimeout,

    #[error("server returned an empty body")]
    EmptyResponse,

    #[error("io error: {message}")]
    Io { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("out of memory while decoding")]
    OutOfMemory,

    #[error("image not found: {path}")]
    NotFound { path: String },

    #[error("no resolver available for {kind} sources")]
    UnsupportedSource { kind: String },

    #[error("unable to generate image")]
    UnableToGenerate,

    #[error("operation cancelled")]
    Cancelled,
}

impl LoadError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates io error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates unsupported source error.
    #[must_use]
    pub fn unsupported(kind: impl std::fmt::Debug) -> Self {
        Self::UnsupportedSource {
            kind: format!("{kind:?}").to_lowercase(),
        }
    }

    /// Returns whether error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether error is one of the HTTP timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::HttpHeadersTimeout | Self::HttpReadTimeout)
    }

    /// Returns whether error came from the network layer.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::Http { .. }
                | Self::Network { .. }
                | Self::HttpHeadersTimeout
                | Self::HttpReadTimeout
                | Self::EmptyResponse
        )
    }

    /// Returns whether the download layer should retry the fetch.
    #[must_use]
    pub const fn is_retryable_download(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Network { .. } | Self::HttpHeadersTimeout | Self::HttpReadTimeout
        )
    }

    /// Returns whether a load task should retry generation.
    ///
    /// Network errors were already retried by the download layer.
    #[must_use]
    pub const fn is_retryable_generation(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::OutOfMemory | Self::UnsupportedSource { .. }
        ) && !self.is_network_error()
    }
}

impl From<std::io::Error> for LoadError {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::OutOfMemory {
            Self::OutOfMemory
        } else {
            Self::io(error.to_string())
        }
    }
}
