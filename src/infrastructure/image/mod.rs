//! Image handling infrastructure.
//!
//! This module provides:
//! - Decoding with downsampling through the `image` crate
//! - Built-in transformations
//! - Source resolution for files, URLs, bundle assets, resources and streams
//! - A channel-backed publication poster

pub mod decoder;
pub mod poster;
pub mod resolvers;
pub mod transform;

pub use decoder::{ImageCrateDecoder, shrink_to_fit};
pub use poster::ChannelPoster;
pub use resolvers::SourceResolver;
pub use transform::{Blur, Grayscale, ResizeToFill};
