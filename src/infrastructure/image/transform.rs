//! Built-in pixel transformations.

use image::DynamicImage;
use image::imageops::FilterType;

use crate::domain::errors::LoadError;
use crate::domain::ports::Transformation;

/// Converts to 8-bit luma.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl Transformation for Grayscale {
    fn key(&self) -> String {
        "grayscale".to_string()
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, LoadError> {
        Ok(image.grayscale())
    }
}

/// Gaussian blur.
#[derive(Debug, Clone, Copy)]
pub struct Blur {
    sigma: f32,
}

impl Blur {
    /// Creates a blur with the given standard deviation.
    #[must_use]
    pub const fn new(sigma: f32) -> Self {
        Self { sigma }
    }
}

impl Transformation for Blur {
    fn key(&self) -> String {
        format!("blur({})", self.sigma)
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, LoadError> {
        if self.sigma <= 0.0 {
            return Ok(image);
        }
        Ok(image.blur(self.sigma))
    }
}

/// Scales and crops to exactly `width` x `height`.
#[derive(Debug, Clone, Copy)]
pub struct ResizeToFill {
    width: u32,
    height: u32,
}

impl ResizeToFill {
    /// Creates a fill-resize to the given size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Transformation for ResizeToFill {
    fn key(&self) -> String {
        format!("fill({}x{})", self.width, self.height)
    }

    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, LoadError> {
        if self.width == 0 || self.height == 0 {
            return Err(LoadError::decode("fill target must be non-zero"));
        }
        Ok(image.resize_to_fill(self.width, self.height, FilterType::Triangle))
    }
}
