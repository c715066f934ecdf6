//! Port for handing results to the UI-owning thread.

use async_trait::async_trait;

use crate::domain::entities::{LoadedImage, TargetHandle, TaskId};

/// What a publication represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationKind {
    /// Shown while the real image loads.
    LoadingPlaceholder,
    /// The requested image.
    Image,
    /// Shown after loading failed.
    ErrorPlaceholder,
}

/// An image ready to be displayed.
#[derive(Debug, Clone)]
pub struct Publication {
    /// Task that produced it.
    pub task_id: TaskId,
    /// View it is destined for.
    pub target: Option<TargetHandle>,
    /// Role of the image.
    pub kind: PublicationKind,
    /// The image.
    pub image: LoadedImage,
}

/// Hands publications to the thread that owns the views.
#[async_trait]
pub trait MainThreadPoster: Send + Sync {
    /// Posts a publication. Resolves once the hand-off is done.
    async fn post(&self, publication: Publication);
}
