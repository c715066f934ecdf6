//! Fakes shared by scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;

use super::load_task::{LoadTask, TaskContext};
use crate::domain::entities::{ImageRequest, ImageSource, LoadOrigin, LoadOutcome, TaskId};
use crate::domain::errors::LoadError;
use crate::domain::ports::mocks::{CountingObserver, MockImageDecoder, RecordingPoster};
use crate::domain::ports::{DataResolver, RequestObserver, ResolvedData};
use crate::infrastructure::cache::MemoryImageCache;

/// Resolver with scripted failures, an optional delay and call tracking.
#[derive(Default)]
pub struct FakeResolver {
    delay: Duration,
    failures: Mutex<VecDeque<LoadError>>,
    permanent: HashMap<String, LoadError>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resolve takes this long unless cancelled.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The next resolve of any source fails with `error`.
    pub fn fail_with(self, error: LoadError) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    /// Every resolve of `identifier` fails with `error`.
    pub fn fail_for(mut self, identifier: &str, error: LoadError) -> Self {
        self.permanent.insert(identifier.to_string(), error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Identifiers in the order resolution started.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

#[async_trait]
impl DataResolver for FakeResolver {
    async fn resolve(
        &self,
        source: &ImageSource,
        _request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedData, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.order.lock().push(source.identifier());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let result = tokio::select! {
            () = cancel.cancelled() => Err(LoadError::Cancelled),
            () = tokio::time::sleep(self.delay) => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result?;

        if let Some(error) = self.permanent.get(&source.identifier()) {
            return Err(error.clone());
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let origin = match source {
            ImageSource::Url(_) => LoadOrigin::Network,
            ImageSource::Stream(_) => LoadOrigin::Stream,
            _ => LoadOrigin::Local,
        };
        Ok(ResolvedData {
            bytes: Bytes::from_static(b"img"),
            origin,
            file_path: None,
        })
    }
}

/// Decoder that always yields a 2x2 image.
pub fn ok_decoder() -> MockImageDecoder {
    let mut decoder = MockImageDecoder::new();
    decoder
        .expect_decode()
        .returning(|_, _| Ok(DynamicImage::new_rgb8(2, 2)));
    decoder
}

/// Task context wired to fakes.
pub struct Harness {
    pub resolver: Arc<FakeResolver>,
    pub poster: Arc<RecordingPoster>,
    pub memory: Arc<MemoryImageCache>,
    pub exit_early: Arc<AtomicBool>,
    pub ctx: Arc<TaskContext>,
    next_id: AtomicU64,
}

impl Harness {
    pub fn new(resolver: FakeResolver, clear_on_oom: bool) -> Self {
        Self::with_decoder(resolver, ok_decoder(), clear_on_oom)
    }

    pub fn with_decoder(
        resolver: FakeResolver,
        decoder: MockImageDecoder,
        clear_on_oom: bool,
    ) -> Self {
        Self::with_decode_permits(resolver, decoder, clear_on_oom, 2)
    }

    /// At most `permits` decodes run at once.
    pub fn with_decode_permits(
        resolver: FakeResolver,
        decoder: MockImageDecoder,
        clear_on_oom: bool,
        permits: usize,
    ) -> Self {
        let resolver = Arc::new(resolver);
        let poster = Arc::new(RecordingPoster::new());
        let memory = Arc::new(MemoryImageCache::new(16));
        let ctx = Arc::new(TaskContext {
            memory_cache: memory.clone(),
            resolver: resolver.clone(),
            decoder: Arc::new(decoder),
            poster: poster.clone(),
            decode_permits: Arc::new(Semaphore::new(permits)),
            clear_memory_cache_on_out_of_memory: clear_on_oom,
        });
        Self {
            resolver,
            poster,
            memory,
            exit_early: Arc::new(AtomicBool::new(false)),
            ctx,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn task(
        &self,
        request: ImageRequest,
        observer: Option<Arc<CountingObserver>>,
    ) -> (Arc<LoadTask>, oneshot::Receiver<LoadOutcome>) {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        LoadTask::new(
            id,
            request,
            Arc::clone(&self.ctx),
            Arc::clone(&self.exit_early),
            observer.map(|o| o as Arc<dyn RequestObserver>),
        )
    }
}
