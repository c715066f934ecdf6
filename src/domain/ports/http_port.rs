//! HTTP transport port.
//!
//! A response is split in two phases so callers can bound the time to first
//! response separately from the body transfer.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::domain::errors::LoadError;

/// Response whose headers have arrived but whose body has not been read.
pub struct HttpResponse {
    status: u16,
    body: BoxFuture<'static, Result<Bytes, LoadError>>,
}

impl HttpResponse {
    /// Creates a response from a status code and a body future.
    pub fn new(
        status: u16,
        body: impl Future<Output = Result<Bytes, LoadError>> + Send + 'static,
    ) -> Self {
        Self {
            status,
            body: body.boxed(),
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Reads the whole body.
    ///
    /// # Errors
    /// Returns error if the transfer fails.
    pub async fn bytes(self) -> Result<Bytes, LoadError> {
        self.body.await
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Port for issuing GET requests.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Sends a GET request and resolves once response headers arrive.
    async fn get(&self, url: &str) -> Result<HttpResponse, LoadError>;
}
