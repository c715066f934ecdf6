//! `image` crate decoder with optional downsampling.

use image::imageops::FilterType;
use image::{DynamicImage, ImageError};

use crate::domain::entities::Downsample;
use crate::domain::errors::LoadError;
use crate::domain::ports::ImageDecoder;

/// Decodes PNG, JPEG and WebP through the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateDecoder {
    scale: f32,
}

impl ImageCrateDecoder {
    /// Creates a decoder that converts point-based downsample targets with `scale`.
    #[must_use]
    pub const fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl Default for ImageCrateDecoder {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ImageDecoder for ImageCrateDecoder {
    fn decode(
        &self,
        bytes: &[u8],
        downsample: Option<Downsample>,
    ) -> Result<DynamicImage, LoadError> {
        let image = image::load_from_memory(bytes).map_err(map_image_error)?;
        Ok(match downsample {
            Some(target) => {
                let (width, height) = target.to_pixels(self.scale);
                shrink_to_fit(image, width, height)
            }
            None => image,
        })
    }
}

fn map_image_error(error: ImageError) -> LoadError {
    match error {
        ImageError::Limits(_) => LoadError::OutOfMemory,
        ImageError::IoError(e) => LoadError::from(e),
        other => LoadError::decode(other.to_string()),
    }
}

/// Shrinks `image` to fit within `width` x `height`, keeping the aspect ratio.
///
/// A zero dimension is unbounded. Images already inside the bounds are
/// returned untouched.
#[must_use]
pub fn shrink_to_fit(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if width == 0 && height == 0 {
        return image;
    }
    let bound_w = if width == 0 { image.width() } else { width };
    let bound_h = if height == 0 { image.height() } else { height };
    if image.width() <= bound_w && image.height() <= bound_h {
        return image;
    }
    image.resize(
        bound_w.min(image.width()),
        bound_h.min(image.height()),
        FilterType::Lanczos3,
    )
}
