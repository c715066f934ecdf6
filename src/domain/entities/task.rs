//! Task identity, lifecycle state and outcome.

use std::fmt;

use crate::domain::errors::LoadError;

use super::image::LoadedImage;

/// Scheduler-assigned task identifier. Monotonic, so it doubles as arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Lifecycle of a load task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Accepted, not started.
    #[default]
    Created,
    /// Served from the memory cache.
    PreparedFromCache,
    /// Memory cache missed; placeholder being published.
    Preparing,
    /// Resolving, decoding and transforming.
    Generating,
    /// Result published.
    Succeeded,
    /// Gave up with an error.
    Failed,
    /// Cancelled, superseded or exited early.
    Cancelled,
}

impl TaskState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Final result of a load task.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Image loaded and published.
    Success(LoadedImage),
    /// Loading failed after all retries.
    Failed(LoadError),
    /// The task was cancelled. Never reported as an error.
    Cancelled,
}

impl LoadOutcome {
    /// Terminal state matching this outcome.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        match self {
            Self::Success(_) => TaskState::Succeeded,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    /// Returns true when the task was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the image if loading succeeded.
    #[must_use]
    pub const fn image(&self) -> Option<&LoadedImage> {
        match self {
            Self::Success(image) => Some(image),
            _ => None,
        }
    }

    /// Returns the error if loading failed.
    #[must_use]
    pub const fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}
