//! Decoded image types.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

/// Where a loaded image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
    /// Read from a file, bundle or resource.
    Local,
    /// Decoded from caller-supplied bytes.
    Stream,
}

impl fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::Local => write!(f, "local"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// A decoded, transformed image ready for display.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Full cache key of the variant.
    pub key: String,
    /// Decoded pixels.
    pub image: Arc<DynamicImage>,
    /// Where the image came from.
    pub origin: LoadOrigin,
}

impl LoadedImage {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
