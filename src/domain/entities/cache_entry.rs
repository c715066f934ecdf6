//! Disk cache index entry.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Longest TTL the journal can record. Longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_millis(u64::MAX);

/// Index record for one blob in the disk cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Sanitized cache key.
    pub key: String,
    /// When the blob was last written.
    pub created_at: DateTime<Utc>,
    /// How long the blob stays valid.
    pub ttl: Duration,
    /// File name of the blob inside the cache directory.
    pub storage_name: String,
}

impl CacheEntry {
    /// Creates an entry, deriving its storage name from key and TTL.
    #[must_use]
    pub fn new(key: impl Into<String>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        let key = key.into();
        let ttl = ttl.min(MAX_TTL);
        let storage_name = Self::storage_name_for(&key, ttl);
        Self {
            key,
            created_at,
            ttl,
            storage_name,
        }
    }

    /// Blob file name for a key: `<key>.<ttlSeconds>`.
    #[must_use]
    pub fn storage_name_for(key: &str, ttl: Duration) -> String {
        format!("{key}.{}", ttl.min(MAX_TTL).as_secs())
    }

    /// Instant after which the entry may be swept.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns true once `created_at + ttl` lies before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }
}
