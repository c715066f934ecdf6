//! Ports for decoding and transforming images.

use image::DynamicImage;

use crate::domain::entities::Downsample;
use crate::domain::errors::LoadError;

/// Turns encoded bytes into pixels.
///
/// Called from a blocking worker thread; implementations may be CPU heavy.
#[cfg_attr(test, mockall::automock)]
pub trait ImageDecoder: Send + Sync {
    /// Decodes `bytes`, shrinking to `downsample` when given.
    ///
    /// # Errors
    /// Returns [`LoadError::Decode`] for unreadable data and
    /// [`LoadError::OutOfMemory`] when the image cannot be allocated.
    fn decode(
        &self,
        bytes: &[u8],
        downsample: Option<Downsample>,
    ) -> Result<DynamicImage, LoadError>;
}

/// A pixel transformation applied after decoding.
pub trait Transformation: Send + Sync {
    /// Stable signature that distinguishes this transformation in cache keys.
    fn key(&self) -> String;

    /// Applies the transformation.
    ///
    /// # Errors
    /// Returns error if the transformation cannot be applied.
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, LoadError>;
}
