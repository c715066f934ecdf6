//! Download bookkeeping types.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

/// Facts about one download, shared with download observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInformation {
    /// Requested URL.
    pub url: String,
    /// Caller-supplied cache key, if usable.
    pub custom_key: Option<String>,
    /// Disk cache key derived from the URL or custom key.
    pub file_name: String,
    /// Whether the result may be written to the disk cache.
    pub allow_disk_cache: bool,
    /// TTL used when writing to the disk cache.
    pub ttl: Duration,
}

/// Bytes produced by the download cache.
#[derive(Debug, Clone)]
pub struct DownloadedData {
    /// Encoded image bytes.
    pub bytes: Bytes,
    /// True when served from the disk cache.
    pub from_disk_cache: bool,
    /// Path of the blob in the disk cache, present when disk caching applies.
    pub file_path: Option<PathBuf>,
}
