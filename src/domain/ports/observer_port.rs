//! Observer hooks for requests and downloads.

use crate::domain::entities::{DownloadInformation, LoadedImage, TaskId};
use crate::domain::errors::LoadError;

/// Per-request completion hooks.
///
/// Exactly one of `on_success`/`on_error` fires per request (neither on
/// cancellation) and `on_finish` always fires exactly once, last.
pub trait RequestObserver: Send + Sync {
    /// The image was loaded and published.
    fn on_success(&self, _image: &LoadedImage) {}

    /// Loading failed.
    fn on_error(&self, _error: &LoadError) {}

    /// The task reached a terminal state.
    fn on_finish(&self, _task: TaskId) {}
}

/// Hooks around network downloads.
pub trait DownloadObserver: Send + Sync {
    /// A network fetch is about to start.
    fn on_download_started(&self, _info: &DownloadInformation) {}

    /// A network fetch produced `len` bytes.
    fn on_download_finished(&self, _info: &DownloadInformation, _len: usize) {}
}

#[cfg(test)]
pub mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Observer counting each hook.
    #[derive(Default)]
    pub struct CountingObserver {
        /// `on_success` calls.
        pub successes: AtomicUsize,
        /// `on_error` calls.
        pub errors: AtomicUsize,
        /// `on_finish` calls.
        pub finishes: AtomicUsize,
    }

    impl CountingObserver {
        /// Returns `(successes, errors, finishes)`.
        pub fn counts(&self) -> (usize, usize, usize) {
            (
                self.successes.load(Ordering::SeqCst),
                self.errors.load(Ordering::SeqCst),
                self.finishes.load(Ordering::SeqCst),
            )
        }
    }

    impl RequestObserver for CountingObserver {
        fn on_success(&self, _image: &LoadedImage) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &LoadError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finish(&self, _task: TaskId) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
