//! Loader configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::entities::{DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::infrastructure::cache::DiskCacheConfig;
use crate::infrastructure::cache::DownloadConfig;
use crate::infrastructure::cache::disk_cache::{
    DEFAULT_CACHE_DURATION, DEFAULT_COMPACTION_THRESHOLD, DEFAULT_SWEEP_BATCH_SIZE,
};
use crate::infrastructure::cache::download_cache::{
    DEFAULT_EMPTY_BODY_TTL, DEFAULT_HEADERS_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use crate::infrastructure::cache::http::DEFAULT_USER_AGENT;
use crate::infrastructure::cache::memory_cache::DEFAULT_CACHE_SIZE;

use super::args::ConfigOverrides;

pub(crate) const APP_NAME: &str = "pixload";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Loader configuration, read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Disk cache settings.
    #[serde(default)]
    pub disk_cache: DiskCacheSettings,

    /// Memory cache settings.
    #[serde(default)]
    pub memory_cache: MemoryCacheSettings,

    /// HTTP settings.
    #[serde(default)]
    pub http: HttpSettings,

    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Default retry policy of new requests.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Root of bundle assets.
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,

    /// Root of platform resources.
    #[serde(default)]
    pub resource_dir: Option<PathBuf>,

    /// Pixels per point, used for point-based downsample targets.
    #[serde(default = "default_display_scale")]
    pub display_scale: f32,
}

/// `[disk_cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCacheSettings {
    /// Cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// TTL of new entries in seconds.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Maximum expired entries removed per sweep.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,

    /// Superseded journal lines tolerated before compaction.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
}

impl Default for DiskCacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            default_ttl_secs: default_ttl_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

/// `[memory_cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheSettings {
    /// Maximum number of decoded images.
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,

    /// Drop every decoded image when a decode runs out of memory.
    #[serde(default = "default_true")]
    pub clear_on_out_of_memory: bool,
}

impl Default for MemoryCacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
            clear_on_out_of_memory: true,
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Seconds to wait for response headers.
    #[serde(default = "default_headers_timeout_secs")]
    pub headers_timeout_secs: u64,

    /// Seconds to wait for the body once headers arrived.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// `User-Agent` header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Share one fetch between concurrent requests for the same file.
    #[serde(default)]
    pub coalesce_downloads: bool,

    /// Seconds an empty body stays cached.
    #[serde(default = "default_empty_body_ttl_secs")]
    pub empty_body_ttl_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            headers_timeout_secs: default_headers_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
            coalesce_downloads: false,
            empty_body_ttl_secs: default_empty_body_ttl_secs(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Tasks running at once.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,

    /// Decodes running at once.
    #[serde(default = "default_max_parallel_decodes")]
    pub max_parallel_decodes: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            max_parallel_decodes: default_max_parallel_decodes(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_retry_count")]
    pub count: u32,

    /// Milliseconds between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            count: default_retry_count(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_display_scale() -> f32 {
    1.0
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_DURATION.as_secs()
}

fn default_sweep_batch_size() -> usize {
    DEFAULT_SWEEP_BATCH_SIZE
}

fn default_compaction_threshold() -> usize {
    DEFAULT_COMPACTION_THRESHOLD
}

fn default_memory_capacity() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_headers_timeout_secs() -> u64 {
    DEFAULT_HEADERS_TIMEOUT.as_secs()
}

fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT.as_secs()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_empty_body_ttl_secs() -> u64 {
    DEFAULT_EMPTY_BODY_TTL.as_secs()
}

fn default_max_parallel_tasks() -> usize {
    4
}

fn default_max_parallel_decodes() -> usize {
    2
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

#[allow(clippy::cast_possible_truncation)]
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

impl LoaderConfig {
    /// Merges CLI overrides into the configuration.
    pub fn merge_with_args(&mut self, args: ConfigOverrides) {
        if let Some(config_path) = args.config {
            self.config = Some(config_path);
        }
        if let Some(log_path) = args.log_path {
            self.log_path = Some(log_path);
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = args.cache_dir {
            self.disk_cache.path = Some(cache_dir);
        }
        if let Some(capacity) = args.memory_capacity {
            self.memory_cache.capacity = capacity;
        }
        if let Some(max_parallel_tasks) = args.max_parallel_tasks {
            self.scheduler.max_parallel_tasks = max_parallel_tasks;
        }
        if let Some(headers_timeout) = args.headers_timeout {
            self.http.headers_timeout_secs = headers_timeout;
        }
        if let Some(read_timeout) = args.read_timeout {
            self.http.read_timeout_secs = read_timeout;
        }
        if let Some(coalesce) = args.coalesce_downloads {
            self.http.coalesce_downloads = coalesce;
        }
        if let Some(bundle_dir) = args.bundle_dir {
            self.bundle_dir = Some(bundle_dir);
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("pixload.log"))
    }

    /// Returns the default disk cache directory, falling back to the temp dir.
    #[must_use]
    pub fn default_cache_dir() -> PathBuf {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
            || std::env::temp_dir().join(APP_NAME).join("images"),
            |dirs| dirs.cache_dir().join("images"),
        )
    }

    /// Returns effective disk cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.disk_cache
            .path
            .clone()
            .unwrap_or_else(Self::default_cache_dir)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Disk cache tuning.
    #[must_use]
    pub fn disk_cache_config(&self) -> DiskCacheConfig {
        DiskCacheConfig {
            default_ttl: Duration::from_secs(self.disk_cache.default_ttl_secs),
            sweep_batch_size: self.disk_cache.sweep_batch_size.max(1),
            compaction_threshold: self.disk_cache.compaction_threshold,
        }
    }

    /// Download tuning.
    #[must_use]
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            headers_timeout: Duration::from_secs(self.http.headers_timeout_secs),
            read_timeout: Duration::from_secs(self.http.read_timeout_secs),
            default_ttl: Duration::from_secs(self.disk_cache.default_ttl_secs),
            empty_body_ttl: Duration::from_secs(self.http.empty_body_ttl_secs),
            coalesce: self.http.coalesce_downloads,
        }
    }

    /// Retry policy seeded into new requests.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            count: self.retry.count,
            delay: Duration::from_millis(self.retry.delay_ms),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            disk_cache: DiskCacheSettings::default(),
            memory_cache: MemoryCacheSettings::default(),
            http: HttpSettings::default(),
            scheduler: SchedulerSettings::default(),
            retry: RetrySettings::default(),
            bundle_dir: None,
            resource_dir: None,
            display_scale: default_display_scale(),
        }
    }
}
