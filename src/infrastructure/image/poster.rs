//! Channel-backed main thread poster.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::ports::{MainThreadPoster, Publication};

/// Forwards publications to a receiver owned by the UI loop.
///
/// Publications sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelPoster {
    tx: mpsc::UnboundedSender<Publication>,
}

impl ChannelPoster {
    /// Creates a poster and the receiver the UI loop should drain.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MainThreadPoster for ChannelPoster {
    async fn post(&self, publication: Publication) {
        let task_id = publication.task_id;
        if self.tx.send(publication).is_err() {
            trace!(task = %task_id, "Publication receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::DynamicImage;

    use super::*;
    use crate::domain::entities::{LoadOrigin, LoadedImage, TaskId};
    use crate::domain::ports::PublicationKind;

    #[tokio::test]
    async fn test_forwards_publications() {
        let (poster, mut rx) = ChannelPoster::new();
        poster
            .post(Publication {
                task_id: TaskId(7),
                target: None,
                kind: PublicationKind::Image,
                image: LoadedImage {
                    key: "k".into(),
                    image: Arc::new(DynamicImage::new_rgb8(1, 1)),
                    origin: LoadOrigin::Stream,
                },
            })
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.task_id, TaskId(7));
        drop(rx);
    }
}
