//! Port definition for the decoded image cache.

use std::sync::Arc;

use image::DynamicImage;

/// Port for in-memory caching of decoded images, keyed by full cache key.
/// Implementations must be thread-safe.
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache, marking it recently used.
    fn get(&self, key: &str) -> Option<Arc<DynamicImage>>;

    /// Stores an image in the cache.
    fn put(&self, key: String, image: Arc<DynamicImage>);

    /// Removes one variant from the cache.
    fn evict(&self, key: &str);

    /// Removes every variant of a raw key. Returns how many were removed.
    fn evict_similar(&self, raw_key: &str) -> usize;

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    fn clear(&self);
}
