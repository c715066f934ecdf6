//! Per-request load state machine.
//!
//! `Created -> PreparedFromCache | Preparing -> Generating -> Succeeded | Failed | Cancelled`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::domain::entities::{
    CacheKey, CacheScope, Downsample, ImageRequest, ImageSource, LoadOrigin, LoadOutcome,
    LoadedImage, TaskId, TaskState,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{
    DataResolver, ImageCachePort, ImageDecoder, MainThreadPoster, Publication, PublicationKind,
    RequestObserver, Transformation,
};

/// Collaborators shared by every task of a scheduler.
pub struct TaskContext {
    /// Decoded image cache.
    pub memory_cache: Arc<dyn ImageCachePort>,
    /// Source resolution.
    pub resolver: Arc<dyn DataResolver>,
    /// Decoder, run on the blocking pool.
    pub decoder: Arc<dyn ImageDecoder>,
    /// Publication sink.
    pub poster: Arc<dyn MainThreadPoster>,
    /// Bounds concurrent decodes independently of task slots.
    pub decode_permits: Arc<Semaphore>,
    /// Drop the memory cache when a decode runs out of memory.
    pub clear_memory_cache_on_out_of_memory: bool,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("memory_cache_len", &self.memory_cache.len())
            .field("decode_permits", &self.decode_permits.available_permits())
            .field(
                "clear_memory_cache_on_out_of_memory",
                &self.clear_memory_cache_on_out_of_memory,
            )
            .finish_non_exhaustive()
    }
}

struct Completion {
    sender: oneshot::Sender<LoadOutcome>,
    observer: Option<Arc<dyn RequestObserver>>,
}

/// One image request on its way through caches, resolution and decoding.
pub struct LoadTask {
    id: TaskId,
    request: ImageRequest,
    key: OnceLock<CacheKey>,
    cancel: CancellationToken,
    state: Mutex<TaskState>,
    ctx: Arc<TaskContext>,
    exit_early: Arc<AtomicBool>,
    completion: Mutex<Option<Completion>>,
}

impl std::fmt::Debug for LoadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("source", &self.request.source)
            .finish_non_exhaustive()
    }
}

impl LoadTask {
    /// Creates a task and the receiver its outcome is delivered on.
    #[must_use]
    pub fn new(
        id: TaskId,
        request: ImageRequest,
        ctx: Arc<TaskContext>,
        exit_early: Arc<AtomicBool>,
        observer: Option<Arc<dyn RequestObserver>>,
    ) -> (Arc<Self>, oneshot::Receiver<LoadOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let task = Arc::new(Self {
            id,
            request,
            key: OnceLock::new(),
            cancel: CancellationToken::new(),
            state: Mutex::new(TaskState::Created),
            ctx,
            exit_early,
            completion: Mutex::new(Some(Completion { sender, observer })),
        });
        (task, receiver)
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// The request this task serves.
    #[must_use]
    pub const fn request(&self) -> &ImageRequest {
        &self.request
    }

    /// Cache key of the request, derived once.
    pub fn key(&self) -> &CacheKey {
        self.key.get_or_init(|| CacheKey::derive(&self.request))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Signals cancellation. The task completes as cancelled at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn should_exit(&self) -> bool {
        self.cancel.is_cancelled() || self.exit_early.load(Ordering::Acquire)
    }

    fn set_state(&self, state: TaskState) {
        trace!(task = %self.id, ?state, "Task state");
        *self.state.lock() = state;
    }

    fn memory_cacheable(&self) -> bool {
        self.request.cache_scope.contains(CacheScope::MEMORY)
            && !self.key().is_empty()
            && (!self.request.source.is_stream() || self.request.usable_custom_key().is_some())
    }

    /// Runs the task to completion.
    pub async fn run(&self) {
        if self.completion.lock().is_none() {
            return;
        }
        let outcome = self.execute().await;
        self.complete(outcome);
    }

    async fn execute(&self) -> LoadOutcome {
        if self.should_exit() {
            return LoadOutcome::Cancelled;
        }

        let key = self.key();
        if self.memory_cacheable()
            && let Some(image) = self.ctx.memory_cache.get(key.full())
        {
            self.set_state(TaskState::PreparedFromCache);
            let loaded = LoadedImage {
                key: key.full().to_string(),
                image,
                origin: LoadOrigin::MemoryCache,
            };
            if !self.publish(PublicationKind::Image, loaded.clone()).await {
                return LoadOutcome::Cancelled;
            }
            return LoadOutcome::Success(loaded);
        }

        self.set_state(TaskState::Preparing);
        if let Some(placeholder) = &self.request.loading_placeholder {
            self.publish_placeholder(placeholder, PublicationKind::LoadingPlaceholder)
                .await;
        }

        if self.should_exit() {
            return LoadOutcome::Cancelled;
        }

        self.set_state(TaskState::Generating);
        match self.generate_with_retry().await {
            Ok(image) => LoadOutcome::Success(image),
            Err(e) if e.is_cancelled() || self.should_exit() => LoadOutcome::Cancelled,
            Err(e) => {
                if let Some(placeholder) = &self.request.error_placeholder {
                    self.publish_placeholder(placeholder, PublicationKind::ErrorPlaceholder)
                        .await;
                }
                LoadOutcome::Failed(e)
            }
        }
    }

    async fn generate_with_retry(&self) -> Result<LoadedImage, LoadError> {
        let mut remaining = self.request.retry.count;
        let mut last_error = None;

        loop {
            if self.should_exit() {
                return Err(LoadError::Cancelled);
            }

            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(LoadError::Cancelled),
                result = self.generate() => result,
            };

            let error = match attempt {
                Ok(image) => return Ok(image),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            if error == LoadError::OutOfMemory {
                self.handle_out_of_memory();
            }

            let retryable = error.is_retryable_generation();
            debug!(task = %self.id, error = %error, remaining, retryable, "Generation failed");
            last_error = Some(error);
            if !retryable || remaining == 0 {
                break;
            }
            remaining -= 1;

            tokio::select! {
                () = self.cancel.cancelled() => return Err(LoadError::Cancelled),
                () = tokio::time::sleep(self.request.retry.delay) => {}
            }
        }

        Err(last_error.unwrap_or(LoadError::UnableToGenerate))
    }

    async fn generate(&self) -> Result<LoadedImage, LoadError> {
        let key = self.key();
        let data = self
            .ctx
            .resolver
            .resolve(&self.request.source, &self.request, &self.cancel)
            .await?;

        if self.should_exit() {
            return Err(LoadError::Cancelled);
        }

        let image = self
            .decode(
                data.bytes,
                self.request.downsample,
                self.request.transformations.clone(),
            )
            .await?;
        let image = Arc::new(image);

        if self.memory_cacheable() {
            self.ctx
                .memory_cache
                .put(key.full().to_string(), Arc::clone(&image));
        }

        let loaded = LoadedImage {
            key: key.full().to_string(),
            image,
            origin: data.origin,
        };
        if !self.publish(PublicationKind::Image, loaded.clone()).await {
            return Err(LoadError::Cancelled);
        }
        Ok(loaded)
    }

    async fn decode(
        &self,
        bytes: Bytes,
        downsample: Option<Downsample>,
        transformations: Vec<Arc<dyn Transformation>>,
    ) -> Result<DynamicImage, LoadError> {
        let _permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(LoadError::Cancelled),
            permit = Arc::clone(&self.ctx.decode_permits).acquire_owned() => {
                permit.map_err(|_| LoadError::Cancelled)?
            }
        };

        if self.should_exit() {
            return Err(LoadError::Cancelled);
        }

        let decoder = Arc::clone(&self.ctx.decoder);
        let cancel = self.cancel.clone();
        let exit_early = Arc::clone(&self.exit_early);
        tokio::task::spawn_blocking(move || {
            let mut image = decoder.decode(&bytes, downsample)?;
            for transformation in &transformations {
                if cancel.is_cancelled() || exit_early.load(Ordering::Acquire) {
                    return Err(LoadError::Cancelled);
                }
                image = transformation.apply(image)?;
            }
            Ok(image)
        })
        .await
        .map_err(|e| LoadError::decode(format!("Decode task panicked: {e}")))?
    }

    fn handle_out_of_memory(&self) {
        if self.ctx.clear_memory_cache_on_out_of_memory {
            warn!(
                task = %self.id,
                cached = self.ctx.memory_cache.len(),
                "Out of memory while decoding, clearing memory cache"
            );
            self.ctx.memory_cache.clear();
        } else {
            warn!(task = %self.id, "Out of memory while decoding");
        }
    }

    async fn publish_placeholder(&self, source: &ImageSource, kind: PublicationKind) {
        match self.load_placeholder(source).await {
            Ok(image) => {
                self.publish(kind, image).await;
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!(task = %self.id, source = ?source, error = %e, "Failed to load placeholder");
            }
        }
    }

    async fn load_placeholder(&self, source: &ImageSource) -> Result<LoadedImage, LoadError> {
        let key = source.identifier();
        let cacheable = self.request.cache_scope.contains(CacheScope::MEMORY) && !source.is_stream();

        if cacheable && let Some(image) = self.ctx.memory_cache.get(&key) {
            return Ok(LoadedImage {
                key,
                image,
                origin: LoadOrigin::MemoryCache,
            });
        }

        let request = ImageRequest::builder(source.clone())
            .cache_scope(self.request.cache_scope)
            .retry(0, Duration::ZERO)
            .build();
        let data = self.ctx.resolver.resolve(source, &request, &self.cancel).await?;
        let image = Arc::new(self.decode(data.bytes, None, Vec::new()).await?);
        if cacheable {
            self.ctx.memory_cache.put(key.clone(), Arc::clone(&image));
        }
        Ok(LoadedImage {
            key,
            image,
            origin: data.origin,
        })
    }

    /// Posts unless the task should exit. Returns whether it posted.
    async fn publish(&self, kind: PublicationKind, image: LoadedImage) -> bool {
        if self.should_exit() {
            return false;
        }
        self.ctx
            .poster
            .post(Publication {
                task_id: self.id,
                target: self.request.target,
                kind,
                image,
            })
            .await;
        true
    }

    /// Finishes the task with `outcome`. Only the first call has an effect.
    ///
    /// Fires `on_success` or `on_error` (never for cancellation), then
    /// `on_finish`, then resolves the task handle.
    pub fn complete(&self, outcome: LoadOutcome) {
        let Some(completion) = self.completion.lock().take() else {
            return;
        };
        self.set_state(outcome.state());

        match &outcome {
            LoadOutcome::Success(image) => {
                debug!(task = %self.id, key = %image.key, origin = %image.origin, "Image loaded");
            }
            LoadOutcome::Failed(error) => {
                debug!(task = %self.id, error = %error, "Image load failed");
            }
            LoadOutcome::Cancelled => trace!(task = %self.id, "Image load cancelled"),
        }

        if let Some(observer) = completion.observer {
            match &outcome {
                LoadOutcome::Success(image) => observer.on_success(image),
                LoadOutcome::Failed(error) => observer.on_error(error),
                LoadOutcome::Cancelled => {}
            }
            observer.on_finish(self.id);
        }

        let _ = completion.sender.send(outcome);
    }
}
