//! Resolves every kind of image source to bytes.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::entities::{ImageRequest, ImageSource, LoadOrigin, SourceKind};
use crate::domain::errors::LoadError;
use crate::domain::ports::{DataResolver, ResolvedData};
use crate::infrastructure::cache::DownloadCache;

/// [`DataResolver`] for files, URLs, bundle assets, resources and streams.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    downloads: DownloadCache,
    bundle_dir: Option<PathBuf>,
    resource_dir: Option<PathBuf>,
}

impl SourceResolver {
    /// Creates a resolver. Bundle and resource sources fail as unsupported
    /// unless their directory is configured.
    #[must_use]
    pub const fn new(
        downloads: DownloadCache,
        bundle_dir: Option<PathBuf>,
        resource_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            downloads,
            bundle_dir,
            resource_dir,
        }
    }

    /// Returns the download cache used for URL sources.
    #[must_use]
    pub const fn downloads(&self) -> &DownloadCache {
        &self.downloads
    }

    async fn read_local(path: &Path) -> Result<ResolvedData, LoadError> {
        trace!(path = %path.display(), "Reading local image");
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(ResolvedData {
                bytes: bytes.into(),
                origin: LoadOrigin::Local,
                file_path: Some(path.to_path_buf()),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LoadError::not_found(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn asset_path(root: Option<&Path>, name: &str, kind: SourceKind) -> Result<PathBuf, LoadError> {
        let root = root.ok_or_else(|| LoadError::unsupported(kind))?;
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(LoadError::not_found(name));
        }
        Ok(root.join(relative))
    }
}

#[async_trait]
impl DataResolver for SourceResolver {
    async fn resolve(
        &self,
        source: &ImageSource,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedData, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        match source {
            ImageSource::File(path) => Self::read_local(path).await,
            ImageSource::Url(url) => {
                let data = self.downloads.fetch(url, request, cancel).await?;
                let origin = if data.from_disk_cache {
                    LoadOrigin::DiskCache
                } else {
                    LoadOrigin::Network
                };
                debug!(url = %url, origin = %origin, size = data.bytes.len(), "Resolved URL");
                Ok(ResolvedData {
                    bytes: data.bytes,
                    origin,
                    file_path: data.file_path,
                })
            }
            ImageSource::Bundle(name) => {
                let path = Self::asset_path(self.bundle_dir.as_deref(), name, SourceKind::Bundle)?;
                Self::read_local(&path).await
            }
            ImageSource::Resource(name) => {
                let path =
                    Self::asset_path(self.resource_dir.as_deref(), name, SourceKind::Resource)?;
                Self::read_local(&path).await
            }
            ImageSource::Stream(stream) => Ok(ResolvedData {
                bytes: stream.data.clone(),
                origin: LoadOrigin::Stream,
                file_path: None,
            }),
        }
    }
}
