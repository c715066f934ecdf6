//! Command-line interface.

use super::app_config::LogLevel;
use crate::domain::entities::CacheScope;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parsed command line.
#[derive(Debug, Parser)]
#[command(
    name = "pixload",
    version,
    about = "Image loading with journaled disk caching and bounded scheduling",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration overrides.
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Options that override `config.toml`.
#[derive(Debug, Default, Args)]
pub struct ConfigOverrides {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", global = true, env = "PIXLOAD_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Bundle asset directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub bundle_dir: Option<PathBuf>,

    /// Decoded images kept in memory.
    #[arg(long, global = true)]
    pub memory_capacity: Option<usize>,

    /// Tasks running at once.
    #[arg(long, global = true)]
    pub max_parallel_tasks: Option<usize>,

    /// Seconds to wait for response headers.
    #[arg(long, global = true)]
    pub headers_timeout: Option<u64>,

    /// Seconds to wait for a response body.
    #[arg(long, global = true)]
    pub read_timeout: Option<u64>,

    /// Share one fetch between concurrent requests for the same URL.
    #[arg(long, global = true)]
    pub coalesce_downloads: Option<bool>,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load images through the caches and report where each came from.
    Fetch {
        /// URLs or file paths.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Downsample to this width in pixels.
        #[arg(long)]
        width: Option<u32>,

        /// Downsample to this height in pixels.
        #[arg(long)]
        height: Option<u32>,

        /// Convert to grayscale.
        #[arg(long)]
        grayscale: bool,

        /// Gaussian blur sigma.
        #[arg(long)]
        blur: Option<f32>,

        /// Retries after the first attempt.
        #[arg(long)]
        retries: Option<u32>,

        /// Cache key to use instead of the source.
        #[arg(long)]
        key: Option<String>,

        /// Skip both caches.
        #[arg(long)]
        no_cache: bool,
    },
    /// Print cache statistics.
    Stats {
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// Drop cached data.
    Clear {
        /// Which caches to clear.
        #[arg(value_enum, default_value_t = ClearTarget::All)]
        target: ClearTarget,
    },
    /// Remove one batch of expired disk cache entries.
    Sweep,
}

/// Cache tier selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClearTarget {
    /// Decoded images in memory.
    Memory,
    /// Downloaded bytes on disk.
    Disk,
    /// Both.
    All,
}

impl From<ClearTarget> for CacheScope {
    fn from(target: ClearTarget) -> Self {
        match target {
            ClearTarget::Memory => Self::MEMORY,
            ClearTarget::Disk => Self::DISK,
            ClearTarget::All => Self::ALL,
        }
    }
}
