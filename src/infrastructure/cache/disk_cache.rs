//! Journaled disk cache for persistence across sessions.
//!
//! Blobs live in one directory as `<key>.<ttlSeconds>` files next to an
//! append-only `.journal` that rebuilds the index on startup.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheEntry;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{Clock, SystemClock};

use super::journal::{self, JOURNAL_FILE_NAME, JournalRecord};

/// Default TTL of cached blobs (30 days).
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default number of expired entries removed per sweep.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

/// Default number of superseded journal lines tolerated before compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1000;

const TEMP_SUFFIX: &str = ".tmp";

/// Tuning knobs of the disk cache.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// TTL used when the caller does not pass one.
    pub default_ttl: Duration,
    /// Maximum entries removed by one sweep.
    pub sweep_batch_size: usize,
    /// Superseded journal lines tolerated before the journal is rewritten.
    pub compaction_threshold: usize,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_CACHE_DURATION,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

/// Statistics about the disk cache.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiskCacheStats {
    /// Cache directory.
    pub root: PathBuf,
    /// Number of indexed entries.
    pub entries: usize,
    /// Entries past their TTL that a sweep would remove.
    pub expired: usize,
}

/// Keeps only ASCII letters and digits.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Disk-based blob cache with a crash-safe journal.
pub struct DiskCache {
    root: PathBuf,
    config: DiskCacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    journal: tokio::sync::Mutex<fs::File>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::RwLock<()>>>>,
    /// Shared by writers, exclusive for [`DiskCache::clear`].
    writers: tokio::sync::RwLock<()>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl DiskCache {
    /// Opens (or creates) a cache in `root` and schedules one expiry sweep.
    ///
    /// A journal with a foreign header wipes the directory; a corrupt record
    /// truncates replay at that line.
    ///
    /// # Errors
    /// Returns error if the directory or journal cannot be created.
    pub async fn open(
        root: PathBuf,
        config: DiskCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Arc<Self>> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| CacheError::io("Failed to create cache dir", &e))?;

        let journal_path = root.join(JOURNAL_FILE_NAME);
        let (entries, rewrite) = Self::load_index(&root, &journal_path, &config).await?;

        if rewrite {
            write_atomically(&journal_path, journal::snapshot(entries.values()).as_bytes())
                .await
                .map_err(|e| CacheError::io("Failed to write journal", &e))?;
        }

        remove_orphans(&root, &entries).await;

        let journal_file = open_journal(&journal_path)
            .await
            .map_err(|e| CacheError::io("Failed to open journal", &e))?;

        info!(
            root = %root.display(),
            entries = entries.len(),
            "Opened disk cache"
        );

        let cache = Arc::new(Self {
            root,
            config,
            clock,
            entries: RwLock::new(entries),
            journal: tokio::sync::Mutex::new(journal_file),
            key_locks: Mutex::new(HashMap::new()),
            writers: tokio::sync::RwLock::new(()),
        });

        let sweeper = Arc::clone(&cache);
        tokio::spawn(async move {
            let removed = sweeper.sweep_expired().await;
            if removed > 0 {
                debug!(removed, "Startup sweep removed expired entries");
            }
        });

        Ok(cache)
    }

    /// Opens a cache in `root` with default settings and the system clock.
    ///
    /// # Errors
    /// Returns error if the directory or journal cannot be created.
    pub async fn open_default(root: PathBuf) -> CacheResult<Arc<Self>> {
        Self::open(root, DiskCacheConfig::default(), Arc::new(SystemClock)).await
    }

    async fn load_index(
        root: &Path,
        journal_path: &Path,
        config: &DiskCacheConfig,
    ) -> CacheResult<(HashMap<String, CacheEntry>, bool)> {
        let text = match fs::read_to_string(journal_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(root = %root.display(), "No journal found, starting empty");
                return Ok((HashMap::new(), true));
            }
            Err(e) => {
                warn!(error = %e, "Unreadable journal, wiping disk cache");
                wipe_dir(root).await?;
                return Ok((HashMap::new(), true));
            }
        };

        match journal::replay(&text) {
            Ok(replay) => {
                if let Some(error) = &replay.stopped_at {
                    warn!(error = %error, "Journal replay stopped early");
                }
                let superseded = replay.records.saturating_sub(replay.entries.len());
                let rewrite = replay.is_truncated() || superseded > config.compaction_threshold;
                if rewrite {
                    debug!(
                        records = replay.records,
                        live = replay.entries.len(),
                        "Compacting journal"
                    );
                }
                Ok((replay.entries, rewrite))
            }
            Err(e) => {
                warn!(error = %e, "Journal header mismatch, wiping disk cache");
                wipe_dir(root).await?;
                Ok((HashMap::new(), true))
            }
        }
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configured default TTL.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Path a blob for `key` with `ttl` is stored at, whether or not it exists yet.
    #[must_use]
    pub fn blob_path(&self, key: &str, ttl: Duration) -> PathBuf {
        self.root
            .join(CacheEntry::storage_name_for(&sanitize_key(key), ttl))
    }

    /// Stores bytes under `key`.
    ///
    /// Concurrent writes to the same key run one after another; readers of
    /// that key wait for the write in flight.
    ///
    /// # Errors
    /// Returns error if the blob or journal line cannot be written.
    pub async fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> CacheResult<()> {
        let key = sanitize_key(key);
        if key.is_empty() {
            return Err(CacheError::InvalidKey(key));
        }

        let _writing = self.writers.read().await;
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.write().await;
            self.write_blob(&key, bytes, ttl).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn write_blob(&self, key: &str, bytes: &[u8], ttl: Duration) -> CacheResult<()> {
        let storage_name = CacheEntry::storage_name_for(key, ttl);
        let path = self.root.join(&storage_name);
        write_atomically(&path, bytes)
            .await
            .map_err(|e| CacheError::io("Failed to write cache file", &e))?;

        let previous = {
            let mut journal = self.journal.lock().await;
            let entry = CacheEntry::new(key, self.clock.now(), ttl);
            let known = self.entries.read().contains_key(key);
            let record_result =
                append_record(&mut journal, &JournalRecord::for_entry(&entry, known)).await;
            if let Err(e) = record_result {
                drop(journal);
                let _ = fs::remove_file(&path).await;
                return Err(CacheError::io("Failed to append journal", &e));
            }
            self.entries.write().insert(key.to_string(), entry)
        };

        if let Some(previous) = previous
            && previous.storage_name != storage_name
        {
            remove_blob(&self.root.join(&previous.storage_name)).await;
        }

        debug!(key, size = bytes.len(), ttl_secs = ttl.as_secs(), "Stored blob in disk cache");
        Ok(())
    }

    /// Reads the blob for `key`.
    ///
    /// Returns `None` for unknown or expired keys and for unreadable files.
    pub async fn try_get(&self, key: &str) -> Option<Bytes> {
        let key = sanitize_key(key);
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.read().await;
            self.read_blob(&key).await
        };
        self.release_key_lock(&key, lock);
        result
    }

    async fn read_blob(&self, key: &str) -> Option<Bytes> {
        let entry = self.live_entry(key)?;
        let path = self.root.join(&entry.storage_name);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key, path = %path.display(), "Disk cache hit");
                Some(Bytes::from(bytes))
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to read indexed cache file");
                None
            }
        }
    }

    /// Returns the blob path of a live entry.
    #[must_use]
    pub fn get_file_path(&self, key: &str) -> Option<PathBuf> {
        self.live_entry(&sanitize_key(key))
            .map(|entry| self.root.join(entry.storage_name))
    }

    /// Returns true if `key` has a live entry.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.live_entry(&sanitize_key(key)).is_some()
    }

    fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.read().get(key).cloned()?;
        if entry.is_expired(self.clock.now()) {
            trace!(key, "Disk cache entry expired");
            return None;
        }
        Some(entry)
    }

    /// Removes `key` from the index and deletes its blob.
    pub async fn remove(&self, key: &str) {
        let key = sanitize_key(key);
        let _writing = self.writers.read().await;
        let lock = self.key_lock(&key);
        {
            let _guard = lock.write().await;
            self.remove_locked(&key).await;
        }
        self.release_key_lock(&key, lock);
    }

    /// Removes `key` only if it is still expired once its write lock is held.
    async fn remove_if_expired(&self, key: &str) -> bool {
        let _writing = self.writers.read().await;
        let lock = self.key_lock(key);
        let removed = {
            let _guard = lock.write().await;
            let expired = self
                .entries
                .read()
                .get(key)
                .is_some_and(|entry| entry.is_expired(self.clock.now()));
            if expired {
                self.remove_locked(key).await;
            } else {
                trace!(key, "Entry refreshed before sweep, keeping it");
            }
            expired
        };
        self.release_key_lock(key, lock);
        removed
    }

    async fn remove_locked(&self, key: &str) {
        let removed = {
            let mut journal = self.journal.lock().await;
            let removed = self.entries.write().remove(key);
            if removed.is_some() {
                let record = JournalRecord::Deleted {
                    key: key.to_string(),
                };
                if let Err(e) = append_record(&mut journal, &record).await {
                    warn!(key, error = %e, "Failed to journal removal");
                }
            }
            removed
        };

        if let Some(entry) = removed {
            remove_blob(&self.root.join(&entry.storage_name)).await;
            debug!(key, "Evicted from disk cache");
        }
    }

    /// Drops every entry and recreates an empty cache directory.
    ///
    /// Waits for writes and removals in flight before wiping.
    ///
    /// # Errors
    /// Returns error if the directory or journal cannot be recreated.
    pub async fn clear(&self) -> CacheResult<()> {
        let _exclusive = self.writers.write().await;
        let mut journal = self.journal.lock().await;
        self.entries.write().clear();

        wipe_dir(&self.root).await?;
        let journal_path = self.root.join(JOURNAL_FILE_NAME);
        fs::write(&journal_path, journal::header())
            .await
            .map_err(|e| CacheError::io("Failed to write journal", &e))?;
        *journal = open_journal(&journal_path)
            .await
            .map_err(|e| CacheError::io("Failed to open journal", &e))?;

        debug!(root = %self.root.display(), "Cleared disk cache");
        Ok(())
    }

    /// Removes up to one batch of expired entries. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.is_expired(now))
            .take(self.config.sweep_batch_size)
            .map(|entry| entry.key.clone())
            .collect();

        let mut removed = 0;
        for key in &expired {
            if self.remove_if_expired(key).await {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Swept expired disk cache entries");
        }
        removed
    }

    /// Returns a copy of the index.
    #[must_use]
    pub fn entries(&self) -> HashMap<String, CacheEntry> {
        self.entries.read().clone()
    }

    /// Returns the number of indexed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> DiskCacheStats {
        let now = self.clock.now();
        let entries = self.entries.read();
        DiskCacheStats {
            root: self.root.clone(),
            entries: entries.len(),
            expired: entries.values().filter(|e| e.is_expired(now)).count(),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::RwLock<()>> {
        Arc::clone(self.key_locks.lock().entry(key.to_string()).or_default())
    }

    fn release_key_lock(&self, key: &str, lock: Arc<tokio::sync::RwLock<()>>) {
        let mut locks = self.key_locks.lock();
        // The map and `lock` are the only holders: nobody is waiting on the key.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }
}

async fn open_journal(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().append(true).open(path).await
}

async fn append_record(journal: &mut fs::File, record: &JournalRecord) -> std::io::Result<()> {
    let mut line = record.to_line();
    line.push('\n');
    journal.write_all(line.as_bytes()).await?;
    journal.flush().await
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    let mut file = fs::File::create(&temp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

async fn remove_blob(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove cache file");
    }
}

async fn wipe_dir(root: &Path) -> CacheResult<()> {
    match fs::remove_dir_all(root).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(root = %root.display(), error = %e, "Failed to wipe cache dir"),
    }
    fs::create_dir_all(root)
        .await
        .map_err(|e| CacheError::io("Failed to create cache dir", &e))
}

/// Deletes files the index does not know about.
async fn remove_orphans(root: &Path, entries: &HashMap<String, CacheEntry>) {
    let known: HashSet<&str> = entries.values().map(|e| e.storage_name.as_str()).collect();

    let Ok(mut dir) = fs::read_dir(root).await else {
        return;
    };

    let mut removed = 0usize;
    while let Ok(Some(item)) = dir.next_entry().await {
        let name = item.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == JOURNAL_FILE_NAME || known.contains(name) {
            continue;
        }
        if item.file_type().await.is_ok_and(|t| t.is_file()) {
            remove_blob(&item.path()).await;
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(removed, "Removed orphaned cache files");
    }
}
