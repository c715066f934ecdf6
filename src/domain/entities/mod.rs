//! Domain entity definitions.

mod cache_entry;
mod cache_key;
mod download;
mod image;
mod request;
mod task;

pub use cache_entry::CacheEntry;
pub use cache_key::{CacheKey, KEY_SEPARATOR};
pub use download::{DownloadInformation, DownloadedData};
pub use image::{LoadOrigin, LoadedImage};
pub use request::{
    CacheScope, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY, Downsample, DownsampleUnit,
    ImageRequest, ImageRequestBuilder, ImageSource, Priority, RetryPolicy, SourceKind,
    StreamSource, TargetHandle,
};
pub use task::{LoadOutcome, TaskId, TaskState};
