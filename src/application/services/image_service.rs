//! Entry point wiring caches, resolution and the scheduler together.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::application::scheduler::{
    ParallelismSource, SchedulerConfig, SchedulerStats, TaskContext, TaskHandle, WorkScheduler,
};
use crate::domain::entities::{
    CacheScope, ImageRequest, ImageRequestBuilder, ImageSource, TargetHandle,
};
use crate::domain::errors::CacheResult;
use crate::domain::ports::{
    Clock, DownloadObserver, HttpFetcher, ImageCachePort, ImageDecoder, MainThreadPoster,
    RequestObserver, SystemClock,
};
use crate::infrastructure::cache::{
    CacheStats, DiskCache, DiskCacheStats, DownloadCache, MemoryImageCache, ReqwestFetcher,
    file_name_for,
};
use crate::infrastructure::config::LoaderConfig;
use crate::infrastructure::image::{ImageCrateDecoder, SourceResolver};

/// Pluggable collaborators of an [`ImageService`].
pub struct Collaborators {
    /// HTTP transport.
    pub http: Arc<dyn HttpFetcher>,
    /// Image decoder.
    pub decoder: Arc<dyn ImageDecoder>,
    /// Publication sink.
    pub poster: Arc<dyn MainThreadPoster>,
    /// Clock for disk cache expiry.
    pub clock: Arc<dyn Clock>,
    /// Overrides the configured task parallelism.
    pub parallelism: Option<ParallelismSource>,
    /// Notified around every network download.
    pub download_observers: Vec<Arc<dyn DownloadObserver>>,
}

impl Collaborators {
    /// Collaborators with the system clock, configured parallelism and no
    /// download observers.
    #[must_use]
    pub fn new(
        http: Arc<dyn HttpFetcher>,
        decoder: Arc<dyn ImageDecoder>,
        poster: Arc<dyn MainThreadPoster>,
    ) -> Self {
        Self {
            http,
            decoder,
            poster,
            clock: Arc::new(SystemClock),
            parallelism: None,
            download_observers: Vec::new(),
        }
    }
}

/// Combined cache and scheduler statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Memory cache.
    pub memory: CacheStats,
    /// Disk cache.
    pub disk: DiskCacheStats,
    /// Scheduler.
    pub scheduler: SchedulerStats,
}

/// Loads images through the memory, disk and network tiers.
pub struct ImageService {
    config: LoaderConfig,
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskCache>,
    downloads: DownloadCache,
    scheduler: WorkScheduler,
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("disk", &self.disk)
            .field("memory", &self.memory.stats())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ImageService {
    /// Opens the disk cache and builds the service.
    ///
    /// # Errors
    /// Returns error if the disk cache directory cannot be opened.
    pub async fn new(config: &LoaderConfig, collaborators: Collaborators) -> CacheResult<Self> {
        let Collaborators {
            http,
            decoder,
            poster,
            clock,
            parallelism,
            download_observers,
        } = collaborators;

        let disk = DiskCache::open(config.effective_cache_dir(), config.disk_cache_config(), clock)
            .await?;
        let downloads = DownloadCache::new(
            Arc::clone(&disk),
            http,
            config.download_config(),
            download_observers,
        );
        let resolver = SourceResolver::new(
            downloads.clone(),
            config.bundle_dir.clone(),
            config.resource_dir.clone(),
        );
        let memory = Arc::new(MemoryImageCache::new(config.memory_cache.capacity));

        let scheduler_config = SchedulerConfig::new(
            parallelism.unwrap_or(ParallelismSource::Fixed(config.scheduler.max_parallel_tasks)),
            config.scheduler.max_parallel_decodes,
        );
        let ctx = Arc::new(TaskContext {
            memory_cache: Arc::clone(&memory) as Arc<dyn ImageCachePort>,
            resolver: Arc::new(resolver),
            decoder,
            poster,
            decode_permits: scheduler_config.decode_permits,
            clear_memory_cache_on_out_of_memory: config.memory_cache.clear_on_out_of_memory,
        });
        let scheduler = WorkScheduler::new(scheduler_config.parallelism, ctx);

        info!(
            cache_dir = %disk.root().display(),
            memory_capacity = memory.capacity(),
            max_parallel = scheduler.stats().max_parallel,
            "Image service ready"
        );

        Ok(Self {
            config: config.clone(),
            memory,
            disk,
            downloads,
            scheduler,
        })
    }

    /// Builds a service with the reqwest transport and the `image` crate decoder.
    ///
    /// # Errors
    /// Returns error if the HTTP client or the disk cache cannot be created.
    pub async fn with_defaults(
        config: &LoaderConfig,
        poster: Arc<dyn MainThreadPoster>,
    ) -> CacheResult<Self> {
        let http = ReqwestFetcher::new(&config.http.user_agent)?;
        let decoder = ImageCrateDecoder::new(config.display_scale);
        Self::new(
            config,
            Collaborators::new(Arc::new(http), Arc::new(decoder), poster),
        )
        .await
    }

    /// Starts a request for `source` with the configured retry policy.
    #[must_use]
    pub fn request(&self, source: ImageSource) -> ImageRequestBuilder {
        let retry = self.config.retry_policy();
        ImageRequest::builder(source).retry(retry.count, retry.delay)
    }

    /// Schedules `request`.
    pub fn load(&self, request: ImageRequest) -> TaskHandle {
        self.scheduler.submit(request, None)
    }

    /// Schedules `request`, reporting its outcome to `observer`.
    pub fn load_with_observer(
        &self,
        request: ImageRequest,
        observer: Arc<dyn RequestObserver>,
    ) -> TaskHandle {
        self.scheduler.submit(request, Some(observer))
    }

    /// Cancels every request matching `predicate`.
    pub fn cancel(&self, predicate: impl Fn(&ImageRequest) -> bool) -> usize {
        self.scheduler.cancel_where_request(predicate)
    }

    /// Cancels the request currently bound to `target`.
    pub fn cancel_target(&self, target: TargetHandle) -> bool {
        self.scheduler
            .task_for_target(target)
            .is_some_and(|id| self.scheduler.cancel_task(id))
    }

    /// See [`WorkScheduler::set_pause_work`].
    pub fn set_pause_work(&self, pause: bool, cancel_existing: bool) {
        self.scheduler.set_pause_work(pause, cancel_existing);
    }

    /// See [`WorkScheduler::set_exit_tasks_early`].
    pub fn set_exit_tasks_early(&self, exit: bool) {
        self.scheduler.set_exit_tasks_early(exit);
    }

    /// Empties the tiers in `scope`.
    ///
    /// # Errors
    /// Returns error if the disk cache cannot be recreated.
    pub async fn invalidate_cache(&self, scope: CacheScope) -> CacheResult<()> {
        if scope.contains(CacheScope::MEMORY) {
            self.memory.clear();
        }
        if scope.contains(CacheScope::DISK) {
            self.disk.clear().await?;
        }
        debug!(?scope, "Cache invalidated");
        Ok(())
    }

    /// Drops the entry stored under raw key `key` (a URL or custom key).
    ///
    /// With `remove_similar`, every memory variant derived from `key` goes too.
    pub async fn invalidate(&self, key: &str, scope: CacheScope, remove_similar: bool) {
        if scope.contains(CacheScope::MEMORY) {
            if remove_similar {
                let removed = self.memory.evict_similar(key);
                debug!(key, removed, "Evicted memory variants");
            } else {
                self.memory.evict(key);
            }
        }
        if scope.contains(CacheScope::DISK) {
            self.disk.remove(&file_name_for(key)).await;
        }
    }

    /// Path of the cached download for `url` under `request`, if it would be
    /// disk cached.
    #[must_use]
    pub fn file_path(&self, url: &str, request: &ImageRequest) -> Option<PathBuf> {
        self.downloads.file_path(url, request)
    }

    /// Waits for downloads still being written to the disk cache.
    pub async fn flush(&self) {
        self.downloads.flush().await;
    }

    /// Removes a batch of expired disk entries.
    pub async fn sweep(&self) -> usize {
        self.disk.sweep_expired().await
    }

    /// Memory cache statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Disk cache statistics.
    #[must_use]
    pub fn disk_stats(&self) -> DiskCacheStats {
        self.disk.stats()
    }

    /// Scheduler statistics.
    #[must_use]
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// All statistics at once.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            memory: self.memory_stats(),
            disk: self.disk_stats(),
            scheduler: self.scheduler_stats(),
        }
    }

    /// Cancels everything and stops accepting requests.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use image::{DynamicImage, ImageFormat};
    use tempfile::TempDir;

    use super::*;
    use crate::domain::entities::{LoadOrigin, LoadOutcome};
    use crate::domain::ports::mocks::{MockHttpFetcher, MockReply, RecordingPoster};
    use crate::infrastructure::image::Grayscale;

    const URL: &str = "https://img.example/cat.png";

    fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(4, 4)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn config(dir: &TempDir) -> LoaderConfig {
        let mut config = LoaderConfig::default();
        config.disk_cache.path = Some(dir.path().join("images"));
        config.retry.count = 0;
        config.retry.delay_ms = 0;
        config
    }

    async fn service(dir: &TempDir, http: MockHttpFetcher) -> (ImageService, Arc<MockHttpFetcher>) {
        let http = Arc::new(http);
        let service = ImageService::new(
            &config(dir),
            Collaborators::new(
                http.clone(),
                Arc::new(ImageCrateDecoder::default()),
                Arc::new(RecordingPoster::new()),
            ),
        )
        .await
        .unwrap();
        (service, http)
    }

    async fn origin(service: &ImageService, request: ImageRequest) -> LoadOrigin {
        match service.load(request).outcome().await {
            LoadOutcome::Success(image) => image.origin,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tiers_in_order() {
        let dir = TempDir::new().unwrap();
        let (service, http) =
            service(&dir, MockHttpFetcher::new().reply(URL, MockReply::ok(png_bytes()))).await;
        let request = || service.request(ImageSource::Url(URL.into())).build();

        assert_eq!(origin(&service, request()).await, LoadOrigin::Network);
        assert_eq!(origin(&service, request()).await, LoadOrigin::MemoryCache);

        service.flush().await;
        service.invalidate_cache(CacheScope::MEMORY).await.unwrap();
        assert_eq!(origin(&service, request()).await, LoadOrigin::DiskCache);
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_similar_variants() {
        let dir = TempDir::new().unwrap();
        let (service, _) =
            service(&dir, MockHttpFetcher::new().reply(URL, MockReply::ok(png_bytes()))).await;

        service.load(service.request(ImageSource::Url(URL.into())).build()).outcome().await;
        service
            .load(
                service
                    .request(ImageSource::Url(URL.into()))
                    .transform(Arc::new(Grayscale))
                    .build(),
            )
            .outcome()
            .await;
        assert_eq!(service.memory_stats().size, 2);
        service.flush().await;
        assert_eq!(service.disk_stats().entries, 1);

        service.invalidate(URL, CacheScope::ALL, true).await;

        assert_eq!(service.memory_stats().size, 0);
        assert_eq!(service.disk_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_exact_key_keeps_variants() {
        let dir = TempDir::new().unwrap();
        let (service, _) =
            service(&dir, MockHttpFetcher::new().reply(URL, MockReply::ok(png_bytes()))).await;
        service.load(service.request(ImageSource::Url(URL.into())).build()).outcome().await;
        service
            .load(
                service
                    .request(ImageSource::Url(URL.into()))
                    .transform(Arc::new(Grayscale))
                    .build(),
            )
            .outcome()
            .await;

        service.invalidate(URL, CacheScope::MEMORY, false).await;

        assert_eq!(service.memory_stats().size, 1);
    }

    #[tokio::test]
    async fn test_local_file_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let (service, http) = service(&dir, MockHttpFetcher::new()).await;

        let origin = origin(&service, service.request(ImageSource::File(path)).build()).await;

        assert_eq!(origin, LoadOrigin::Local);
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_uses_configured_retry_policy() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.retry.count = 5;
        config.retry.delay_ms = 10;
        let service = ImageService::new(
            &config,
            Collaborators::new(
                Arc::new(MockHttpFetcher::new()),
                Arc::new(ImageCrateDecoder::default()),
                Arc::new(RecordingPoster::new()),
            ),
        )
        .await
        .unwrap();

        let request = service.request(ImageSource::Url(URL.into())).build();

        assert_eq!(request.retry.count, 5);
        assert_eq!(request.retry.delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_file_path_only_for_disk_scope() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(&dir, MockHttpFetcher::new()).await;

        let cached = service.request(ImageSource::Url(URL.into())).build();
        let memory_only = service
            .request(ImageSource::Url(URL.into()))
            .cache_scope(CacheScope::MEMORY)
            .build();

        let path = service.file_path(URL, &cached).unwrap();
        assert!(path.starts_with(dir.path().join("images")));
        assert!(service.file_path(URL, &memory_only).is_none());
    }

    #[tokio::test]
    async fn test_cancel_target() {
        let dir = TempDir::new().unwrap();
        let (service, _) = service(
            &dir,
            MockHttpFetcher::new().reply(
                URL,
                MockReply::ok(png_bytes()).with_headers_delay(Duration::from_secs(5)),
            ),
        )
        .await;
        let target = TargetHandle(1);

        let handle = service.load(
            service
                .request(ImageSource::Url(URL.into()))
                .target(target)
                .build(),
        );

        assert!(service.cancel_target(target));
        assert!(handle.outcome().await.is_cancelled());
        assert!(!service.cancel_target(TargetHandle(2)));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let dir = TempDir::new().unwrap();
        let (service, http) = service(&dir, MockHttpFetcher::new()).await;

        service.shutdown();
        let outcome = service
            .load(service.request(ImageSource::Url(URL.into())).build())
            .outcome()
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(http.calls(), 0);
    }
}
