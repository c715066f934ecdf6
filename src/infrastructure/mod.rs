//! Infrastructure layer with storage, network and decoding adapters.

/// Disk, download and memory caches.
pub mod cache;
/// Loader configuration.
pub mod config;
/// Decoding, transformations and source resolution.
pub mod image;

pub use cache::{
    BoundedLru, CacheStats, DiskCache, DiskCacheConfig, DiskCacheStats, DownloadCache,
    DownloadConfig, MemoryImageCache, ReqwestFetcher,
};
pub use config::{CliArgs, ConfigStore, LoaderConfig, LogLevel};
pub use image::{ChannelPoster, ImageCrateDecoder, SourceResolver};
