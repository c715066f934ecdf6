//! Bounded, prioritized execution of load tasks.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, error, info, trace};

use crate::domain::entities::{
    ImageRequest, LoadOutcome, Priority, TargetHandle, TaskId, TaskState,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::RequestObserver;

use super::load_task::{LoadTask, TaskContext};

/// Where the concurrency bound comes from.
#[derive(Clone)]
pub enum ParallelismSource {
    /// A fixed number of tasks.
    Fixed(usize),
    /// Re-evaluated on every enqueue.
    Dynamic(Arc<dyn Fn() -> usize + Send + Sync>),
}

impl ParallelismSource {
    /// Current bound, never below one.
    #[must_use]
    pub fn current(&self) -> usize {
        match self {
            Self::Fixed(n) => *n,
            Self::Dynamic(factory) => factory(),
        }
        .max(1)
    }
}

impl std::fmt::Debug for ParallelismSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Task concurrency bound.
    pub parallelism: ParallelismSource,
    /// Decode concurrency bound, shared by all tasks.
    pub decode_permits: Arc<Semaphore>,
}

impl SchedulerConfig {
    /// Creates settings with `max_parallel_decodes` decode permits.
    #[must_use]
    pub fn new(parallelism: ParallelismSource, max_parallel_decodes: usize) -> Self {
        Self {
            parallelism,
            decode_permits: Arc::new(Semaphore::new(max_parallel_decodes.max(1))),
        }
    }
}

/// Snapshot of scheduler load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    /// Tasks currently running.
    pub running: usize,
    /// Tasks waiting for a slot.
    pub pending: usize,
    /// Current concurrency bound.
    pub max_parallel: usize,
    /// Whether new tasks are held back.
    pub paused: bool,
    /// Whether tasks abort at their next checkpoint.
    pub exit_early: bool,
}

type PendingKey = (Reverse<Priority>, u64);

struct SchedulerState {
    pending: BTreeMap<PendingKey, Arc<LoadTask>>,
    running: HashMap<TaskId, Arc<LoadTask>>,
    targets: HashMap<TargetHandle, TaskId>,
    max_parallel: usize,
    paused: bool,
    shut_down: bool,
}

impl SchedulerState {
    fn release_target(&mut self, task: &LoadTask) {
        if let Some(target) = task.request().target
            && self.targets.get(&target) == Some(&task.id())
        {
            self.targets.remove(&target);
        }
    }
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    next_id: AtomicU64,
    exit_early: Arc<AtomicBool>,
    parallelism: ParallelismSource,
    ctx: Arc<TaskContext>,
}

/// Accepts load requests and runs at most N of them at once.
#[derive(Clone)]
pub struct WorkScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkScheduler")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkScheduler {
    /// Creates a scheduler running tasks against `ctx`.
    #[must_use]
    pub fn new(parallelism: ParallelismSource, ctx: Arc<TaskContext>) -> Self {
        let max_parallel = parallelism.current();
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    pending: BTreeMap::new(),
                    running: HashMap::new(),
                    targets: HashMap::new(),
                    max_parallel,
                    paused: false,
                    shut_down: false,
                }),
                next_id: AtomicU64::new(1),
                exit_early: Arc::new(AtomicBool::new(false)),
                parallelism,
                ctx,
            }),
        }
    }

    /// Creates a task for `request` and enqueues it.
    pub fn submit(
        &self,
        request: ImageRequest,
        observer: Option<Arc<dyn RequestObserver>>,
    ) -> TaskHandle {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (task, receiver) = LoadTask::new(
            id,
            request,
            Arc::clone(&self.inner.ctx),
            Arc::clone(&self.inner.exit_early),
            observer,
        );
        self.enqueue(Arc::clone(&task));
        TaskHandle {
            task,
            receiver,
            scheduler: self.clone(),
        }
    }

    /// Queues a task.
    ///
    /// In exit-early mode or after shutdown the task completes as cancelled
    /// instead. A task bound to a target supersedes the one bound before it.
    pub fn enqueue(&self, task: Arc<LoadTask>) {
        let superseded = {
            let mut state = self.inner.state.lock();
            if state.shut_down || self.inner.exit_early.load(Ordering::Acquire) {
                drop(state);
                debug!(task = %task.id(), "Dropping task, scheduler is not accepting work");
                task.complete(LoadOutcome::Cancelled);
                return;
            }

            state.max_parallel = self.inner.parallelism.current();
            let superseded = task
                .request()
                .target
                .and_then(|target| state.targets.insert(target, task.id()));
            state
                .pending
                .insert((Reverse(task.request().priority), task.id().0), Arc::clone(&task));
            superseded
        };

        trace!(task = %task.id(), priority = task.request().priority.0, "Task enqueued");

        if let Some(previous) = superseded
            && previous != task.id()
        {
            debug!(task = %previous, by = %task.id(), "Task superseded");
            self.cancel_task(previous);
        }

        self.pump();
    }

    fn pump(&self) {
        loop {
            let task = {
                let mut state = self.inner.state.lock();
                if state.paused || state.shut_down || state.running.len() >= state.max_parallel {
                    return;
                }
                let Some((_, task)) = state.pending.pop_first() else {
                    return;
                };
                state.running.insert(task.id(), Arc::clone(&task));
                task
            };
            self.spawn(task);
        }
    }

    fn spawn(&self, task: Arc<LoadTask>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let runner = Arc::clone(&task);
            if let Err(e) = tokio::spawn(async move { runner.run().await }).await {
                error!(task = %task.id(), error = %e, "Load task aborted");
                task.complete(LoadOutcome::Failed(LoadError::UnableToGenerate));
            }
            scheduler.on_finished(&task);
        });
    }

    fn on_finished(&self, task: &LoadTask) {
        {
            let mut state = self.inner.state.lock();
            state.running.remove(&task.id());
            state.release_target(task);
        }
        self.pump();
    }

    /// Cancels every pending or running task matching `predicate`.
    /// Returns how many tasks were hit.
    pub fn cancel(&self, predicate: impl Fn(&LoadTask) -> bool) -> usize {
        let (removed, running) = {
            let mut state = self.inner.state.lock();
            let keys: Vec<PendingKey> = state
                .pending
                .iter()
                .filter(|(_, task)| predicate(task))
                .map(|(key, _)| *key)
                .collect();
            let removed: Vec<Arc<LoadTask>> = keys
                .iter()
                .filter_map(|key| state.pending.remove(key))
                .collect();
            for task in &removed {
                state.release_target(task);
            }
            let running: Vec<Arc<LoadTask>> = state
                .running
                .values()
                .filter(|task| predicate(task))
                .cloned()
                .collect();
            (removed, running)
        };

        for task in &removed {
            task.cancel();
            task.complete(LoadOutcome::Cancelled);
        }
        for task in &running {
            task.cancel();
        }

        let count = removed.len() + running.len();
        if count > 0 {
            debug!(pending = removed.len(), running = running.len(), "Cancelled tasks");
        }
        count
    }

    /// Cancels every task whose request matches `predicate`.
    pub fn cancel_where_request(&self, predicate: impl Fn(&ImageRequest) -> bool) -> usize {
        self.cancel(|task| predicate(task.request()))
    }

    /// Cancels one task. Returns false if it already finished.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.cancel(|task| task.id() == id) > 0
    }

    /// Removes a task that has not started yet; it completes as cancelled.
    /// Returns false if the task is not pending.
    pub fn remove_pending_task(&self, id: TaskId) -> bool {
        let task = {
            let mut state = self.inner.state.lock();
            let key = state
                .pending
                .iter()
                .find(|(_, task)| task.id() == id)
                .map(|(key, _)| *key);
            let task = key.and_then(|key| state.pending.remove(&key));
            if let Some(task) = &task {
                state.release_target(task);
            }
            task
        };

        match task {
            Some(task) => {
                task.complete(LoadOutcome::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Holds back new tasks while `pause` is set. With `cancel_existing`,
    /// every pending and running task is cancelled as well.
    pub fn set_pause_work(&self, pause: bool, cancel_existing: bool) {
        self.inner.state.lock().paused = pause;
        debug!(pause, cancel_existing, "Scheduler pause changed");
        if cancel_existing {
            self.cancel(|_| true);
        }
        if !pause {
            self.pump();
        }
    }

    /// Makes running tasks abort at their next checkpoint and new tasks be
    /// dropped. Enabling it also resumes paused work so queued tasks drain.
    pub fn set_exit_tasks_early(&self, exit: bool) {
        self.inner.exit_early.store(exit, Ordering::Release);
        debug!(exit, "Scheduler exit-early changed");
        if exit {
            self.set_pause_work(false, false);
        }
    }

    /// Cancels everything and stops accepting work.
    pub fn shutdown(&self) {
        self.inner.state.lock().shut_down = true;
        let cancelled = self.cancel(|_| true);
        info!(cancelled, "Scheduler shut down");
    }

    /// Returns a snapshot of scheduler load.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            running: state.running.len(),
            pending: state.pending.len(),
            max_parallel: state.max_parallel,
            paused: state.paused,
            exit_early: self.inner.exit_early.load(Ordering::Acquire),
        }
    }

    /// Task currently registered for `target`.
    #[must_use]
    pub fn task_for_target(&self, target: TargetHandle) -> Option<TaskId> {
        self.inner.state.lock().targets.get(&target).copied()
    }
}

/// Handle to a submitted task.
pub struct TaskHandle {
    task: Arc<LoadTask>,
    receiver: oneshot::Receiver<LoadOutcome>,
    scheduler: WorkScheduler,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Cancels the task.
    pub fn cancel(&self) {
        self.scheduler.cancel_task(self.task.id());
    }

    /// Waits for the task to finish.
    pub async fn outcome(self) -> LoadOutcome {
        self.receiver.await.unwrap_or(LoadOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;
    use crate::application::scheduler::test_support::{FakeResolver, Harness};
    use crate::domain::entities::ImageSource;
    use crate::domain::ports::mocks::{CountingObserver, MockImageDecoder};
    use crate::domain::ports::{ImageCachePort, PublicationKind};

    fn request(url: &str) -> ImageRequest {
        ImageRequest::builder(ImageSource::Url(url.into()))
            .retry(0, Duration::ZERO)
            .build()
    }

    fn scheduler(harness: &Harness, max: usize) -> WorkScheduler {
        WorkScheduler::new(ParallelismSource::Fixed(max), Arc::clone(&harness.ctx))
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_millis(40)), true);
        let scheduler = scheduler(&harness, 2);

        let handles: Vec<TaskHandle> = (0..5)
            .map(|i| scheduler.submit(request(&format!("https://x/{i}")), None))
            .collect();
        assert_eq!(scheduler.stats().running, 2);
        assert_eq!(scheduler.stats().pending, 3);

        for handle in handles {
            assert!(matches!(handle.outcome().await, LoadOutcome::Success(_)));
        }
        assert!(harness.resolver.max_active() <= 2);
        assert_eq!(harness.resolver.calls(), 5);
        assert_eq!(harness.poster.published_tasks().len(), 5);
    }

    #[tokio::test]
    async fn test_decodes_are_bounded_by_decode_permits() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut decoder = MockImageDecoder::new();
        {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            decoder.expect_decode().returning(move |_, _| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(image::DynamicImage::new_rgb8(2, 2))
            });
        }
        let harness = Harness::with_decode_permits(FakeResolver::new(), decoder, true, 1);
        let scheduler = scheduler(&harness, 4);

        let handles: Vec<TaskHandle> = (0..4)
            .map(|i| scheduler.submit(request(&format!("https://x/{i}")), None))
            .collect();
        assert_eq!(scheduler.stats().running, 4);

        for handle in handles {
            assert!(matches!(handle.outcome().await, LoadOutcome::Success(_)));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(harness.resolver.calls(), 4);
    }

    #[tokio::test]
    async fn test_target_supersedes_previous_task() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_millis(40)), true);
        let scheduler = scheduler(&harness, 4);
        let target = TargetHandle(9);

        let first = scheduler.submit(
            ImageRequest::builder(ImageSource::Url("https://x/a".into()))
                .target(target)
                .build(),
            None,
        );
        let second = scheduler.submit(
            ImageRequest::builder(ImageSource::Url("https://x/b".into()))
                .target(target)
                .build(),
            None,
        );
        let second_id = second.id();
        assert_eq!(scheduler.task_for_target(target), Some(second_id));

        assert!(first.outcome().await.is_cancelled());
        assert!(matches!(second.outcome().await, LoadOutcome::Success(_)));
        assert_eq!(harness.poster.published_tasks(), vec![second_id]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.task_for_target(target), None);
    }

    #[tokio::test]
    async fn test_cancellation_is_silent() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_secs(5)), true);
        let scheduler = scheduler(&harness, 1);
        let running_observer = Arc::new(CountingObserver::default());
        let pending_observer = Arc::new(CountingObserver::default());

        let running = scheduler.submit(
            request("https://x/a"),
            Some(running_observer.clone() as Arc<dyn RequestObserver>),
        );
        let pending = scheduler.submit(
            request("https://x/b"),
            Some(pending_observer.clone() as Arc<dyn RequestObserver>),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(scheduler.cancel_where_request(|_| true), 2);

        assert!(running.outcome().await.is_cancelled());
        assert!(pending.outcome().await.is_cancelled());
        assert_eq!(running_observer.counts(), (0, 0, 1));
        assert_eq!(pending_observer.counts(), (0, 0, 1));
        assert!(harness.poster.publications().is_empty());
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let harness = Harness::new(FakeResolver::new(), true);
        let scheduler = scheduler(&harness, 1);
        scheduler.set_pause_work(true, false);

        let submit = |url: &str, priority: Priority| {
            scheduler.submit(
                ImageRequest::builder(ImageSource::Url(url.into()))
                    .priority(priority)
                    .build(),
                None,
            )
        };
        let handles = vec![
            submit("low", Priority::LOW),
            submit("normal-1", Priority::NORMAL),
            submit("high", Priority::HIGH),
            submit("normal-2", Priority::NORMAL),
        ];
        assert_eq!(scheduler.stats().running, 0);

        scheduler.set_pause_work(false, false);
        for handle in handles {
            handle.outcome().await;
        }

        assert_eq!(
            harness.resolver.order(),
            vec!["high", "normal-1", "normal-2", "low"]
        );
    }

    #[tokio::test]
    async fn test_pause_with_cancel_existing() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_secs(5)), true);
        let scheduler = scheduler(&harness, 1);
        let a = scheduler.submit(request("https://x/a"), None);
        let b = scheduler.submit(request("https://x/b"), None);

        scheduler.set_pause_work(true, true);

        assert!(a.outcome().await.is_cancelled());
        assert!(b.outcome().await.is_cancelled());
        let c = scheduler.submit(request("https://x/c"), None);
        assert_eq!(c.state(), TaskState::Created);
        assert_eq!(scheduler.stats().pending, 1);
    }

    #[tokio::test]
    async fn test_exit_early_drops_new_and_running_tasks() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_millis(30)), true);
        let scheduler = scheduler(&harness, 1);
        scheduler.set_pause_work(true, false);
        let queued = scheduler.submit(request("https://x/a"), None);

        scheduler.set_exit_tasks_early(true);
        let dropped = scheduler.submit(request("https://x/b"), None);

        assert!(dropped.outcome().await.is_cancelled());
        assert!(queued.outcome().await.is_cancelled());
        assert!(!scheduler.stats().paused);
        assert!(harness.poster.publications().is_empty());

        scheduler.set_exit_tasks_early(false);
        let later = scheduler.submit(request("https://x/c"), None);
        assert!(matches!(later.outcome().await, LoadOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_remove_pending_task() {
        let harness = Harness::new(FakeResolver::new(), true);
        let scheduler = scheduler(&harness, 1);
        scheduler.set_pause_work(true, false);
        let handle = scheduler.submit(request("https://x/a"), None);

        assert!(scheduler.remove_pending_task(handle.id()));
        assert!(!scheduler.remove_pending_task(handle.id()));
        assert!(handle.outcome().await.is_cancelled());
        assert_eq!(harness.resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_dynamic_parallelism() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_millis(30)), true);
        let limit = Arc::new(AtomicU64::new(1));
        let source_limit = Arc::clone(&limit);
        #[allow(clippy::cast_possible_truncation)]
        let scheduler = WorkScheduler::new(
            ParallelismSource::Dynamic(Arc::new(move || {
                source_limit.load(Ordering::SeqCst) as usize
            })),
            Arc::clone(&harness.ctx),
        );

        let a = scheduler.submit(request("https://x/a"), None);
        let b = scheduler.submit(request("https://x/b"), None);
        assert_eq!(scheduler.stats().running, 1);

        limit.store(3, Ordering::SeqCst);
        let c = scheduler.submit(request("https://x/c"), None);
        assert_eq!(scheduler.stats().running, 3);

        for handle in [a, b, c] {
            handle.outcome().await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_rejects() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_secs(5)), true);
        let scheduler = scheduler(&harness, 1);
        let running = scheduler.submit(request("https://x/a"), None);

        scheduler.shutdown();
        let rejected = scheduler.submit(request("https://x/b"), None);

        assert!(running.outcome().await.is_cancelled());
        assert!(rejected.outcome().await.is_cancelled());
    }

    #[tokio::test]
    async fn test_memory_hit_through_scheduler() {
        let harness = Harness::new(FakeResolver::new(), true);
        let scheduler = scheduler(&harness, 2);

        let first = scheduler.submit(request("https://x/a"), None).outcome().await;
        assert!(matches!(first, LoadOutcome::Success(_)));
        assert!(harness.memory.get("https://x/a").is_some());

        let handle = scheduler.submit(request("https://x/a"), None);
        let outcome = handle.outcome().await;
        let image = outcome.image().unwrap();
        assert_eq!(image.origin, crate::domain::entities::LoadOrigin::MemoryCache);
        assert_eq!(harness.resolver.calls(), 1);
        assert!(
            harness
                .poster
                .publications()
                .iter()
                .all(|p| p.kind == PublicationKind::Image)
        );
    }

    #[tokio::test]
    async fn test_handle_cancel() {
        let harness = Harness::new(FakeResolver::new().with_delay(Duration::from_secs(5)), true);
        let scheduler = scheduler(&harness, 1);
        let handle = scheduler.submit(request("https://x/a"), None);

        handle.cancel();

        let outcome = assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), handle.outcome()).await
        );
        assert!(outcome.is_cancelled());
    }
}
