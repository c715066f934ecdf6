//! Disk, download and memory caches.

pub mod disk_cache;
pub mod download_cache;
pub mod http;
pub mod journal;
pub mod memory_cache;

pub use disk_cache::{DiskCache, DiskCacheConfig, DiskCacheStats};
pub use download_cache::{DownloadCache, DownloadConfig, file_name_for};
pub use http::ReqwestFetcher;
pub use memory_cache::{BoundedLru, CacheStats, MemoryImageCache};
