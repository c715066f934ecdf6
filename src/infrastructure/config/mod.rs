//! Loader configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{
    DiskCacheSettings, HttpSettings, LoaderConfig, LogLevel, MemoryCacheSettings, RetrySettings,
    SchedulerSettings,
};
pub use args::{ClearTarget, CliArgs, Command, ConfigOverrides};
pub use storage::{ConfigError, ConfigStore};
