//! Load tasks and the scheduler that runs them.

pub mod load_task;
pub mod work_scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use load_task::{LoadTask, TaskContext};
pub use work_scheduler::{
    ParallelismSource, SchedulerConfig, SchedulerStats, TaskHandle, WorkScheduler,
};
