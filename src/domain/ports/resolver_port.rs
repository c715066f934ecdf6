//! Port for turning an image source into bytes.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::domain::entities::{ImageRequest, ImageSource, LoadOrigin};
use crate::domain::errors::LoadError;

/// Encoded bytes for a source.
#[derive(Debug, Clone)]
pub struct ResolvedData {
    /// Encoded image bytes.
    pub bytes: Bytes,
    /// Where the bytes came from.
    pub origin: LoadOrigin,
    /// Backing file, when there is one.
    pub file_path: Option<PathBuf>,
}

/// Resolves any [`ImageSource`] to bytes.
#[async_trait]
pub trait DataResolver: Send + Sync {
    /// Fetches the bytes of `source` on behalf of `request`.
    ///
    /// `source` is either the request's own source or one of its placeholders.
    async fn resolve(
        &self,
        source: &ImageSource,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedData, LoadError>;
}
