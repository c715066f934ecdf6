//! reqwest-backed HTTP transport.

use async_trait::async_trait;

use crate::domain::errors::{CacheError, CacheResult, LoadError};
use crate::domain::ports::{HttpFetcher, HttpResponse};

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("pixload/", env!("CARGO_PKG_VERSION"));

/// [`HttpFetcher`] over a shared `reqwest::Client`.
///
/// The client carries no overall timeout; the download cache bounds headers
/// and body separately.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Builds a client with the given user agent.
    ///
    /// # Errors
    /// Returns error if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn network_error(e: &reqwest::Error) -> LoadError {
    LoadError::network(format!("Request failed: {e}"))
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<HttpResponse, LoadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(&e))?;

        let status = response.status().as_u16();
        Ok(HttpResponse::new(status, async move {
            response.bytes().await.map_err(|e| network_error(&e))
        }))
    }
}
