//! Pixload - caching and scheduling engine for image loading.
//!
//! Requests flow through an LRU memory cache of decoded images, a journaled
//! disk cache of downloaded bytes and the network, scheduled with bounded
//! parallelism and published back to the thread that owns the views.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the scheduler and the image service.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, decoding and configuration.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "pixload";
