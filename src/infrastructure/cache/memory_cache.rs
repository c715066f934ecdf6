//! In-memory LRU cache implementation.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// Default maximum number of decoded images kept in memory.
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Bounded LRU map guarded by a single lock.
///
/// Reads promote; `peek` does not. A capacity of zero is treated as one.
pub struct BoundedLru<K: Hash + Eq, V> {
    cache: Mutex<LruCache<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Decoded image cache keyed by full cache key.
pub type MemoryImageCache = BoundedLru<String, Arc<DynamicImage>>;

impl<K: Hash + Eq, V: Clone> BoundedLru<K, V> {
    /// Creates a new cache with the specified capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }

    /// Inserts or replaces a value and marks it most recently used.
    /// Returns the entry evicted to make room, if any.
    pub fn add_or_replace(&self, key: K, value: V) -> Option<(K, V)> {
        let mut cache = self.cache.lock();
        if cache.contains(&key) {
            cache.put(key, value);
            None
        } else {
            cache.push(key, value)
        }
    }

    /// Looks up a value and marks it most recently used.
    pub fn try_get_value(&self, key: &K) -> Option<V> {
        let value = self.cache.lock().get(key).cloned();
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Looks up a value without promoting it.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.cache.lock().peek(key).cloned()
    }

    /// Removes one entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.cache.lock().pop(key)
    }

    /// Removes every entry whose key matches. Returns how many were removed.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize
    where
        K: Clone,
    {
        let mut cache = self.cache.lock();
        let doomed: Vec<K> = cache
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            cache.pop(key);
        }
        doomed.len()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
            capacity: self.capacity(),
        }
    }
}

impl<K: Hash + Eq, V: Clone> Default for BoundedLru<K, V> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of entries.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {}/{} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.capacity, self.hit_rate, self.hits, self.misses
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &str) -> Option<Arc<DynamicImage>> {
        let found = self.try_get_value(&key.to_string());
        if found.is_some() {
            trace!(key, "Memory cache hit");
        } else {
            trace!(key, "Memory cache miss");
        }
        found
    }

    fn put(&self, key: String, image: Arc<DynamicImage>) {
        debug!(key = %key, "Storing image in memory cache");
        if let Some((evicted, _)) = self.add_or_replace(key, image) {
            trace!(key = %evicted, "Evicted least recently used image");
        }
    }

    fn evict(&self, key: &str) {
        if self.remove(&key.to_string()).is_some() {
            debug!(key, "Evicted image from memory cache");
        }
    }

    fn evict_similar(&self, raw_key: &str) -> usize {
        let removed = self.remove_where(|full| CacheKey::is_variant_of(full, raw_key));
        if removed > 0 {
            debug!(raw_key, removed, "Evicted image variants from memory cache");
        }
        removed
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn clear(&self) {
        Self::clear(self);
        debug!("Cleared memory image cache");
    }
}
