use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixload::application::{ImageService, TaskHandle};
use pixload::domain::entities::{
    CacheScope, Downsample, ImageRequest, ImageSource, LoadOutcome,
};
use pixload::infrastructure::config::Command;
use pixload::infrastructure::image::{Blur, Grayscale};
use pixload::infrastructure::{ChannelPoster, CliArgs, ConfigStore, LoaderConfig};

fn init_logging(config: &LoaderConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &mut CliArgs) -> Result<LoaderConfig> {
    let overrides = std::mem::take(&mut args.overrides);
    let store = match &overrides.config {
        Some(path) => ConfigStore::with_dir(
            path.parent().map(PathBuf::from).unwrap_or_default(),
        ),
        None => ConfigStore::new()?,
    };
    let mut config = store.load_config(overrides.config.as_deref())?;
    config.merge_with_args(overrides);
    Ok(config)
}

fn source_for(raw: &str) -> ImageSource {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        ImageSource::Url(raw.to_string())
    } else {
        ImageSource::File(PathBuf::from(raw))
    }
}

struct FetchOptions {
    width: Option<u32>,
    height: Option<u32>,
    grayscale: bool,
    blur: Option<f32>,
    retries: Option<u32>,
    key: Option<String>,
    no_cache: bool,
}

impl FetchOptions {
    fn request(&self, service: &ImageService, raw: &str) -> ImageRequest {
        let mut builder = service.request(source_for(raw));
        if self.width.is_some() || self.height.is_some() {
            builder = builder.downsample(Downsample::pixels(
                self.width.unwrap_or(0),
                self.height.unwrap_or(0),
            ));
        }
        if self.grayscale {
            builder = builder.transform(Arc::new(Grayscale));
        }
        if let Some(sigma) = self.blur {
            builder = builder.transform(Arc::new(Blur::new(sigma)));
        }
        if let Some(key) = &self.key {
            builder = builder.custom_cache_key(key.clone());
        }
        if self.no_cache {
            builder = builder.cache_scope(CacheScope::empty());
        }

        let mut request = builder.build();
        if let Some(count) = self.retries {
            request.retry.count = count;
        }
        request
    }
}

async fn fetch(service: &ImageService, sources: Vec<String>, options: &FetchOptions) -> bool {
    let handles: Vec<(String, TaskHandle)> = sources
        .into_iter()
        .map(|raw| {
            let handle = service.load(options.request(service, &raw));
            (raw, handle)
        })
        .collect();

    let mut all_ok = true;
    for (raw, handle) in handles {
        match handle.outcome().await {
            LoadOutcome::Success(image) => println!(
                "{raw}: {}x{} from {}",
                image.width(),
                image.height(),
                image.origin
            ),
            LoadOutcome::Failed(error) => {
                all_ok = false;
                println!("{raw}: failed: {error}");
            }
            LoadOutcome::Cancelled => {
                all_ok = false;
                println!("{raw}: cancelled");
            }
        }
    }

    service.flush().await;
    all_ok
}

async fn run(service: &ImageService, command: Command) -> Result<()> {
    match command {
        Command::Fetch {
            sources,
            width,
            height,
            grayscale,
            blur,
            retries,
            key,
            no_cache,
        } => {
            let options = FetchOptions {
                width,
                height,
                grayscale,
                blur,
                retries,
                key,
                no_cache,
            };
            if !fetch(service, sources, &options).await {
                return Err(eyre!("some images failed to load"));
            }
        }
        Command::Stats { json } => {
            let stats = service.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("memory: {}", stats.memory);
                println!(
                    "disk:   {} entries ({} expired) in {}",
                    stats.disk.entries,
                    stats.disk.expired,
                    stats.disk.root.display()
                );
            }
        }
        Command::Clear { target } => {
            service.invalidate_cache(CacheScope::from(target)).await?;
            println!("cleared {target:?} cache");
        }
        Command::Sweep => {
            let removed = service.sweep().await;
            println!("removed {removed} expired entries");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();

    let mut args = CliArgs::parse();
    let config = load_config(&mut args)?;
    init_logging(&config)?;

    info!(version = pixload::VERSION, "Starting pixload");

    let (poster, mut publications) = ChannelPoster::new();
    let drain = tokio::spawn(async move {
        while let Some(publication) = publications.recv().await {
            debug!(
                task = %publication.task_id,
                kind = ?publication.kind,
                key = %publication.image.key,
                "Publication received"
            );
        }
    });

    let service = ImageService::with_defaults(&config, Arc::new(poster)).await?;
    let result = run(&service, args.command).await;

    service.shutdown();
    drop(service);
    drain.abort();

    result
}
