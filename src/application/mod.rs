//! Application layer with the task scheduler and the image service.

/// Load tasks and their scheduler.
pub mod scheduler;
/// Image service.
pub mod services;

pub use scheduler::{ParallelismSource, TaskHandle, WorkScheduler};
pub use services::{Collaborators, ImageService, ServiceStats};
