//! Disk-backed URL downloads.
//!
//! A URL is served from the disk cache when possible, otherwise fetched with a
//! headers timeout and a separate body timeout, retried, and written back.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::domain::entities::{
    CacheScope, DownloadInformation, DownloadedData, ImageRequest, RetryPolicy,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{DownloadObserver, HttpFetcher};

use super::disk_cache::{DEFAULT_CACHE_DURATION, DiskCache};

/// Default bound on time to first response.
pub const DEFAULT_HEADERS_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on body transfer once headers arrived.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL for cached empty bodies.
pub const DEFAULT_EMPTY_BODY_TTL: Duration = Duration::from_secs(5 * 60);

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, LoadError>>>;

/// Download settings.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Bound on time to first response.
    pub headers_timeout: Duration,
    /// Bound on the body transfer.
    pub read_timeout: Duration,
    /// TTL when the request does not set one.
    pub default_ttl: Duration,
    /// TTL for empty 2xx bodies.
    pub empty_body_ttl: Duration,
    /// Share one network fetch between concurrent callers of the same file.
    pub coalesce: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            headers_timeout: DEFAULT_HEADERS_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            default_ttl: DEFAULT_CACHE_DURATION,
            empty_body_ttl: DEFAULT_EMPTY_BODY_TTL,
            coalesce: false,
        }
    }
}

/// Disk cache key for a URL or custom key: hex of the first 16 bytes of its SHA-256.
#[must_use]
pub fn file_name_for(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Default)]
struct PendingWrites {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingWrites {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Resolves URLs to bytes through the disk cache.
#[derive(Clone)]
pub struct DownloadCache {
    disk: Arc<DiskCache>,
    http: Arc<dyn HttpFetcher>,
    config: DownloadConfig,
    observers: Arc<[Arc<dyn DownloadObserver>]>,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
    pending_writes: Arc<PendingWrites>,
}

impl std::fmt::Debug for DownloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCache")
            .field("disk", &self.disk)
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl DownloadCache {
    /// Creates a download cache over `disk`.
    #[must_use]
    pub fn new(
        disk: Arc<DiskCache>,
        http: Arc<dyn HttpFetcher>,
        config: DownloadConfig,
        observers: Vec<Arc<dyn DownloadObserver>>,
    ) -> Self {
        Self {
            disk,
            http,
            config,
            observers: observers.into(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            pending_writes: Arc::new(PendingWrites::default()),
        }
    }

    /// Returns the underlying disk cache.
    #[must_use]
    pub const fn disk(&self) -> &Arc<DiskCache> {
        &self.disk
    }

    /// Describes the download `request` would perform for `url`.
    #[must_use]
    pub fn download_information(&self, url: &str, request: &ImageRequest) -> DownloadInformation {
        let custom_key = request.usable_custom_key().map(str::to_string);
        let file_name = file_name_for(custom_key.as_deref().unwrap_or(url));
        DownloadInformation {
            url: url.to_string(),
            custom_key,
            file_name,
            allow_disk_cache: request.cache_scope.contains(CacheScope::DISK),
            ttl: request.cache_duration.unwrap_or(self.config.default_ttl),
        }
    }

    /// Fetches `url`, consulting the disk cache first when the request allows it.
    ///
    /// # Errors
    /// Returns the last download error once retries are exhausted,
    /// [`LoadError::EmptyResponse`] for an empty body and
    /// [`LoadError::Cancelled`] if `cancel` fires first.
    pub async fn fetch(
        &self,
        url: &str,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadedData, LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let info = self.download_information(url, request);

        if info.allow_disk_cache
            && let Some(bytes) = self.disk.try_get(&info.file_name).await
        {
            trace!(url, file_name = %info.file_name, "Serving download from disk cache");
            if bytes.is_empty() {
                return Err(LoadError::EmptyResponse);
            }
            return Ok(DownloadedData {
                bytes,
                from_disk_cache: true,
                file_path: self.disk.get_file_path(&info.file_name),
            });
        }

        let file_path = info
            .allow_disk_cache
            .then(|| self.disk.blob_path(&info.file_name, info.ttl));

        let bytes = if self.config.coalesce {
            let shared = self.shared_fetch(info, request.retry);
            tokio::select! {
                () = cancel.cancelled() => return Err(LoadError::Cancelled),
                result = shared => result?,
            }
        } else {
            self.download_and_store(&info, request.retry, cancel).await?
        };

        Ok(DownloadedData {
            bytes,
            from_disk_cache: false,
            file_path,
        })
    }

    fn shared_fetch(&self, info: DownloadInformation, retry: RetryPolicy) -> SharedFetch {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(&info.file_name) {
            debug!(url = %info.url, "Joining in-flight download");
            return existing.clone();
        }

        let this = self.clone();
        let file_name = info.file_name.clone();
        // Detached so the download finishes even if every caller gives up.
        let download = tokio::spawn(async move {
            let result = this
                .download_and_store(&info, retry, &CancellationToken::new())
                .await;
            this.in_flight.lock().remove(&info.file_name);
            result
        });
        let fetch = async move {
            download.await.unwrap_or_else(|e| {
                warn!(error = %e, "Shared download task failed");
                Err(LoadError::UnableToGenerate)
            })
        }
        .boxed()
        .shared();

        in_flight.insert(file_name, fetch.clone());
        fetch
    }

    async fn download_and_store(
        &self,
        info: &DownloadInformation,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Bytes, LoadError> {
        for observer in self.observers.iter() {
            observer.on_download_started(info);
        }

        let bytes = self.download_with_retry(&info.url, retry, cancel).await?;

        for observer in self.observers.iter() {
            observer.on_download_finished(info, bytes.len());
        }

        let empty = bytes.is_empty();
        if info.allow_disk_cache {
            let ttl = if empty {
                self.config.empty_body_ttl
            } else {
                info.ttl
            };
            let disk = Arc::clone(&self.disk);
            let file_name = info.file_name.clone();
            let payload = bytes.clone();
            let pending = Arc::clone(&self.pending_writes);
            pending.begin();
            tokio::spawn(async move {
                if let Err(e) = disk.put(&file_name, &payload, ttl).await {
                    warn!(file_name = %file_name, error = %e, "Failed to cache download to disk");
                }
                pending.end();
            });
        }

        if empty {
            debug!(url = %info.url, "Download returned an empty body");
            return Err(LoadError::EmptyResponse);
        }
        Ok(bytes)
    }

    async fn download_with_retry(
        &self,
        url: &str,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Bytes, LoadError> {
        let mut attempt = 0u32;
        loop {
            match self.download_once(url, cancel).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable_download() && attempt < retry.count => {
                    attempt += 1;
                    warn!(
                        url,
                        attempt,
                        max_retries = retry.count,
                        error = %e,
                        "Download failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(LoadError::Cancelled),
                        () = tokio::time::sleep(retry.delay) => {}
                    }
                }
                Err(e) => {
                    debug!(url, error = %e, "Download failed");
                    return Err(e);
                }
            }
        }
    }

    async fn download_once(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes, LoadError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LoadError::Cancelled),
            response = timeout(self.config.headers_timeout, self.http.get(url)) => {
                response.map_err(|_| LoadError::HttpHeadersTimeout)??
            }
        };

        if !response.is_success() {
            return Err(LoadError::Http {
                status: response.status(),
            });
        }

        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LoadError::Cancelled),
            body = timeout(self.config.read_timeout, response.bytes()) => {
                body.map_err(|_| LoadError::HttpReadTimeout)??
            }
        };

        trace!(url, size = bytes.len(), "Downloaded");
        Ok(bytes)
    }

    /// Waits until every detached disk write has finished.
    pub async fn flush(&self) {
        self.pending_writes.wait().await;
    }

    /// Path the blob for `url` under `request` occupies when disk caching applies.
    #[must_use]
    pub fn file_path(&self, url: &str, request: &ImageRequest) -> Option<PathBuf> {
        let info = self.download_information(url, request);
        info.allow_disk_cache
            .then(|| self.disk.blob_path(&info.file_name, info.ttl))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::entities::ImageSource;
    use crate::domain::ports::mocks::{ManualClock, MockHttpFetcher, MockReply};
    use crate::infrastructure::cache::disk_cache::DiskCacheConfig;
    use tempfile::TempDir;

    const URL: &str = "https://img.example/a.png";

    async fn setup(
        fetcher: MockHttpFetcher,
        config: DownloadConfig,
    ) -> (DownloadCache, Arc<MockHttpFetcher>, TempDir) {
        let temp = TempDir::new().unwrap();
        let disk = DiskCache::open(
            temp.path().to_path_buf(),
            DiskCacheConfig::default(),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        let fetcher = Arc::new(fetcher);
        let cache = DownloadCache::new(disk, fetcher.clone(), config, Vec::new());
        (cache, fetcher, temp)
    }

    fn request(retries: u32) -> ImageRequest {
        ImageRequest::builder(ImageSource::Url(URL.into()))
            .retry(retries, Duration::from_millis(5))
            .build()
    }

    async fn wait_for_blob(cache: &DownloadCache, file_name: &str) {
        cache.flush().await;
        assert!(cache.disk().contains(file_name), "blob {file_name} never written");
    }

    #[test]
    fn test_file_name_is_short_hex_digest() {
        let name = file_name_for(URL);
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, file_name_for(URL));
        assert_ne!(name, file_name_for("https://img.example/b.png"));
    }

    #[tokio::test]
    async fn test_custom_key_selects_file_name() {
        let (cache, _, _temp) = setup(MockHttpFetcher::new(), DownloadConfig::default()).await;

        let custom = ImageRequest::builder(ImageSource::Url(URL.into()))
            .custom_cache_key("avatar-42")
            .build();
        assert_eq!(
            cache.download_information(URL, &custom).file_name,
            file_name_for("avatar-42")
        );

        let clashing = ImageRequest::builder(ImageSource::Url(URL.into()))
            .custom_cache_key("loading.png")
            .loading_placeholder(ImageSource::Bundle("loading.png".into()))
            .build();
        let info = cache.download_information(URL, &clashing);
        assert_eq!(info.file_name, file_name_for(URL));
        assert_eq!(info.custom_key, None);
    }

    #[tokio::test]
    async fn test_network_then_disk_hit() {
        let fetcher = MockHttpFetcher::new().reply(URL, MockReply::ok(vec![1u8, 2, 3]));
        let (cache, fetcher, _temp) = setup(fetcher, DownloadConfig::default()).await;
        let req = request(0);
        let token = CancellationToken::new();

        let first = cache.fetch(URL, &req, &token).await.unwrap();
        assert!(!first.from_disk_cache);
        assert_eq!(first.bytes.as_ref(), &[1, 2, 3]);
        let path = first.file_path.unwrap();
        assert!(path.ends_with(format!("{}.{}", file_name_for(URL), DEFAULT_CACHE_DURATION.as_secs())));

        wait_for_blob(&cache, &file_name_for(URL)).await;

        let second = cache.fetch(URL, &req, &token).await.unwrap();
        assert!(second.from_disk_cache);
        assert_eq!(second.bytes.as_ref(), &[1, 2, 3]);
        assert_eq!(second.file_path, Some(path));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_memory_only_scope_skips_disk() {
        let fetcher = MockHttpFetcher::new().reply(URL, MockReply::ok(vec![9u8]));
        let (cache, fetcher, _temp) = setup(fetcher, DownloadConfig::default()).await;
        let req = ImageRequest::builder(ImageSource::Url(URL.into()))
            .cache_scope(CacheScope::MEMORY)
            .build();
        let token = CancellationToken::new();

        let data = cache.fetch(URL, &req, &token).await.unwrap();
        assert!(data.file_path.is_none());
        cache.fetch(URL, &req, &token).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert!(cache.disk().is_empty());
    }

    #[tokio::test]
    async fn test_headers_timeout() {
        let fetcher = MockHttpFetcher::new().reply(
            URL,
            MockReply::ok(vec![1u8]).with_headers_delay(Duration::from_secs(5)),
        );
        let config = DownloadConfig {
            headers_timeout: Duration::from_millis(30),
            ..DownloadConfig::default()
        };
        let (cache, _, _temp) = setup(fetcher, config).await;

        let result = cache.fetch(URL, &request(0), &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err(), LoadError::HttpHeadersTimeout);
    }

    #[tokio::test]
    async fn test_read_timeout_starts_after_headers() {
        let fetcher = MockHttpFetcher::new().reply(
            URL,
            MockReply::ok(vec![1u8])
                .with_headers_delay(Duration::from_millis(60))
                .with_body_delay(Duration::from_secs(5)),
        );
        let config = DownloadConfig {
            headers_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(30),
            ..DownloadConfig::default()
        };
        let (cache, _, _temp) = setup(fetcher, config).await;

        let result = cache.fetch(URL, &request(0), &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err(), LoadError::HttpReadTimeout);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let fetcher = MockHttpFetcher::new()
            .reply(URL, MockReply::status(500))
            .reply(URL, MockReply::error(LoadError::network("reset")))
            .reply(URL, MockReply::ok(vec![7u8]));
        let (cache, fetcher, _temp) = setup(fetcher, DownloadConfig::default()).await;

        let data = cache
            .fetch(URL, &request(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(data.bytes.as_ref(), &[7]);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let fetcher = MockHttpFetcher::new().reply(URL, MockReply::status(503));
        let (cache, fetcher, _temp) = setup(fetcher, DownloadConfig::default()).await;

        let result = cache.fetch(URL, &request(2), &CancellationToken::new()).await;

        assert_eq!(result.unwrap_err(), LoadError::Http { status: 503 });
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_retried() {
        let fetcher = MockHttpFetcher::new().reply(
            URL,
            MockReply::ok(vec![1u8]).with_headers_delay(Duration::from_secs(5)),
        );
        let (cache, fetcher, _temp) = setup(fetcher, DownloadConfig::default()).await;
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = cache.fetch(URL, &request(3), &token).await;
        assert_eq!(result.unwrap_err(), LoadError::Cancelled);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_is_cached_briefly() {
        let fetcher = MockHttpFetcher::new().reply(URL, MockReply::ok(Bytes::new()));
        let (cache, fetcher, _temp) = setup(fetcher, DownloadConfig::default()).await;
        let token = CancellationToken::new();

        let result = cache.fetch(URL, &request(0), &token).await;
        assert_eq!(result.unwrap_err(), LoadError::EmptyResponse);

        let file_name = file_name_for(URL);
        wait_for_blob(&cache, &file_name).await;
        let path = cache.disk().get_file_path(&file_name).unwrap();
        assert!(path.ends_with(format!("{file_name}.300")));

        let again = cache.fetch(URL, &request(0), &token).await;
        assert_eq!(again.unwrap_err(), LoadError::EmptyResponse);
        assert_eq!(fetcher.calls(), 1);
    }

    async fn concurrent_fetches(coalesce: bool) -> usize {
        let fetcher = MockHttpFetcher::new().reply(
            URL,
            MockReply::ok(vec![1u8, 2]).with_headers_delay(Duration::from_millis(50)),
        );
        let config = DownloadConfig {
            coalesce,
            ..DownloadConfig::default()
        };
        let (cache, fetcher, _temp) = setup(fetcher, config).await;
        let req = ImageRequest::builder(ImageSource::Url(URL.into()))
            .cache_scope(CacheScope::MEMORY)
            .build();
        let token = CancellationToken::new();

        let (a, b, c) = tokio::join!(
            cache.fetch(URL, &req, &token),
            cache.fetch(URL, &req, &token),
            cache.fetch(URL, &req, &token),
        );
        for data in [a, b, c] {
            assert_eq!(data.unwrap().bytes.as_ref(), &[1, 2]);
        }
        fetcher.calls()
    }

    #[tokio::test]
    async fn test_downloads_not_coalesced_by_default() {
        assert_eq!(concurrent_fetches(false).await, 3);
    }

    #[tokio::test]
    async fn test_coalesced_downloads_share_one_fetch() {
        assert_eq!(concurrent_fetches(true).await, 1);
    }

    #[tokio::test]
    async fn test_coalesced_download_outlives_cancelled_callers() {
        let fetcher = MockHttpFetcher::new().reply(
            URL,
            MockReply::ok(vec![4u8, 2]).with_headers_delay(Duration::from_millis(50)),
        );
        let config = DownloadConfig {
            coalesce: true,
            ..DownloadConfig::default()
        };
        let (cache, fetcher, _temp) = setup(fetcher, config).await;
        let req = request(0);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result = cache.fetch(URL, &req, &token).await;
        assert_eq!(result.unwrap_err(), LoadError::Cancelled);

        tokio::time::sleep(Duration::from_millis(150)).await;
        wait_for_blob(&cache, &file_name_for(URL)).await;
        assert!(cache.in_flight.lock().is_empty());

        let data = cache
            .fetch(URL, &req, &CancellationToken::new())
            .await
            .unwrap();
        assert!(data.from_disk_cache);
        assert_eq!(data.bytes.as_ref(), &[4, 2]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        finished_bytes: AtomicUsize,
    }

    impl DownloadObserver for Counting {
        fn on_download_started(&self, _info: &DownloadInformation) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_download_finished(&self, _info: &DownloadInformation, len: usize) {
            self.finished_bytes.fetch_add(len, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_download_observers() {
        let temp = TempDir::new().unwrap();
        let disk = DiskCache::open_default(temp.path().to_path_buf()).await.unwrap();
        let fetcher = Arc::new(MockHttpFetcher::new().reply(URL, MockReply::ok(vec![0u8; 10])));
        let observer = Arc::new(Counting::default());
        let cache = DownloadCache::new(
            disk,
            fetcher,
            DownloadConfig::default(),
            vec![observer.clone() as Arc<dyn DownloadObserver>],
        );

        cache
            .fetch(URL, &request(0), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(observer.started.load(Ordering::SeqCst), 1);
        assert_eq!(observer.finished_bytes.load(Ordering::SeqCst), 10);
    }
}
