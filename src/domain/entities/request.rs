//! Image load request description.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::ports::Transformation;

/// Default number of retries after a failed generation attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where the bytes of an image come from.
#[derive(Clone)]
pub enum ImageSource {
    /// A file on the local filesystem.
    File(PathBuf),
    /// A remote resource fetched over HTTP(S).
    Url(String),
    /// An asset shipped with the application bundle.
    Bundle(String),
    /// A compiled-in platform resource.
    Resource(String),
    /// Caller-supplied bytes.
    Stream(StreamSource),
}

impl ImageSource {
    /// Creates a stream source from raw bytes.
    #[must_use]
    pub fn stream(data: impl Into<Bytes>) -> Self {
        Self::Stream(StreamSource {
            identity: None,
            data: data.into(),
        })
    }

    /// Creates a stream source with a stable identity.
    #[must_use]
    pub fn identified_stream(identity: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Stream(StreamSource {
            identity: Some(identity.into()),
            data: data.into(),
        })
    }

    /// Returns the identifier used to derive the raw cache key.
    #[must_use]
    pub fn identifier(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Url(url) => url.clone(),
            Self::Bundle(name) | Self::Resource(name) => name.clone(),
            Self::Stream(stream) => stream
                .identity
                .clone()
                .unwrap_or_else(|| ANONYMOUS_STREAM_KEY.to_string()),
        }
    }

    /// Returns true for caller-supplied byte streams.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns the kind of source.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::File(_) => SourceKind::File,
            Self::Url(_) => SourceKind::Url,
            Self::Bundle(_) => SourceKind::Bundle,
            Self::Resource(_) => SourceKind::Resource,
            Self::Stream(_) => SourceKind::Stream,
        }
    }
}

const ANONYMOUS_STREAM_KEY: &str = "stream";

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Bundle(name) => f.debug_tuple("Bundle").field(name).finish(),
            Self::Resource(name) => f.debug_tuple("Resource").field(name).finish(),
            Self::Stream(stream) => f
                .debug_struct("Stream")
                .field("identity", &stream.identity)
                .field("len", &stream.data.len())
                .finish(),
        }
    }
}

/// Bytes handed over by the caller.
#[derive(Debug, Clone)]
pub struct StreamSource {
    /// Optional stable identity of the stream.
    pub identity: Option<String>,
    /// Encoded image bytes.
    pub data: Bytes,
}

/// Kind of an [`ImageSource`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Local file.
    File,
    /// Remote URL.
    Url,
    /// Application bundle asset.
    Bundle,
    /// Platform resource.
    Resource,
    /// Caller-supplied bytes.
    Stream,
}

bitflags! {
    /// Which cache tiers a request may read from and write to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CacheScope: u8 {
        /// In-memory LRU cache of decoded images.
        const MEMORY = 0b01;
        /// Journaled disk cache of downloaded bytes.
        const DISK = 0b10;
        /// Both tiers.
        const ALL = Self::MEMORY.bits() | Self::DISK.bits();
    }
}

impl Default for CacheScope {
    fn default() -> Self {
        Self::ALL
    }
}

/// Unit of a downsample target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownsampleUnit {
    /// Physical pixels.
    #[default]
    Pixels,
    /// Device-independent points, scaled by the display density.
    Points,
}

/// Target size the decoder should shrink an image to.
///
/// A zero dimension means "derive from the aspect ratio".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Downsample {
    /// Target width.
    pub width: u32,
    /// Target height.
    pub height: u32,
    /// Unit of `width` and `height`.
    pub unit: DownsampleUnit,
}

impl Downsample {
    /// Creates a downsample target in pixels.
    #[must_use]
    pub const fn pixels(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            unit: DownsampleUnit::Pixels,
        }
    }

    /// Creates a downsample target in device-independent points.
    #[must_use]
    pub const fn points(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            unit: DownsampleUnit::Points,
        }
    }

    /// Returns the target in pixels for the given display scale.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn to_pixels(self, scale: f32) -> (u32, u32) {
        match self.unit {
            DownsampleUnit::Pixels => (self.width, self.height),
            DownsampleUnit::Points => (
                (self.width as f32 * scale).round() as u32,
                (self.height as f32 * scale).round() as u32,
            ),
        }
    }
}

/// Opaque handle of the view or control an image is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetHandle(pub u64);

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Retry policy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub count: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: DEFAULT_RETRY_COUNT,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Scheduling priority. Higher values start first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    /// Background prefetch work.
    pub const LOW: Self = Self(-1);
    /// Regular loads.
    pub const NORMAL: Self = Self(0);
    /// Visible content.
    pub const HIGH: Self = Self(1);
}

/// Immutable description of one image load.
#[derive(Clone)]
pub struct ImageRequest {
    /// Where the image bytes come from.
    pub source: ImageSource,
    /// Caller-supplied cache key overriding the source identifier.
    pub custom_cache_key: Option<String>,
    /// Transformations applied after decoding, in order.
    pub transformations: Vec<Arc<dyn Transformation>>,
    /// Optional decode target size.
    pub downsample: Option<Downsample>,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Cache tiers this request may use.
    pub cache_scope: CacheScope,
    /// Disk cache TTL override.
    pub cache_duration: Option<Duration>,
    /// Scheduling priority.
    pub priority: Priority,
    /// View the result is published to.
    pub target: Option<TargetHandle>,
    /// Image shown while loading.
    pub loading_placeholder: Option<ImageSource>,
    /// Image shown when loading fails.
    pub error_placeholder: Option<ImageSource>,
}

impl ImageRequest {
    /// Starts building a request for the given source.
    #[must_use]
    pub fn builder(source: ImageSource) -> ImageRequestBuilder {
        ImageRequestBuilder::new(source)
    }

    /// Returns the custom cache key if it can stand in for the source.
    ///
    /// A key equal to one of the placeholder identifiers would alias the
    /// placeholder's cache entries and is ignored.
    #[must_use]
    pub fn usable_custom_key(&self) -> Option<&str> {
        let key = self.custom_cache_key.as_deref()?;
        if key.trim().is_empty() {
            return None;
        }
        let is_placeholder = [&self.loading_placeholder, &self.error_placeholder]
            .into_iter()
            .flatten()
            .any(|placeholder| placeholder.identifier() == key);
        (!is_placeholder).then_some(key)
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transformation_keys: Vec<String> =
            self.transformations.iter().map(|t| t.key()).collect();
        f.debug_struct("ImageRequest")
            .field("source", &self.source)
            .field("custom_cache_key", &self.custom_cache_key)
            .field("transformations", &transformation_keys)
            .field("downsample", &self.downsample)
            .field("retry", &self.retry)
            .field("cache_scope", &self.cache_scope)
            .field("priority", &self.priority)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ImageRequest`].
#[derive(Debug, Clone)]
pub struct ImageRequestBuilder {
    request: ImageRequest,
}

impl ImageRequestBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new(source: ImageSource) -> Self {
        Self {
            request: ImageRequest {
                source,
                custom_cache_key: None,
                transformations: Vec::new(),
                downsample: None,
                retry: RetryPolicy::default(),
                cache_scope: CacheScope::ALL,
                cache_duration: None,
                priority: Priority::NORMAL,
                target: None,
                loading_placeholder: None,
                error_placeholder: None,
            },
        }
    }

    /// Overrides the cache key.
    #[must_use]
    pub fn custom_cache_key(mut self, key: impl Into<String>) -> Self {
        self.request.custom_cache_key = Some(key.into());
        self
    }

    /// Appends a transformation.
    #[must_use]
    pub fn transform(mut self, transformation: Arc<dyn Transformation>) -> Self {
        self.request.transformations.push(transformation);
        self
    }

    /// Sets the downsample target.
    #[must_use]
    pub const fn downsample(mut self, downsample: Downsample) -> Self {
        self.request.downsample = Some(downsample);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn retry(mut self, count: u32, delay: Duration) -> Self {
        self.request.retry = RetryPolicy { count, delay };
        self
    }

    /// Restricts the cache tiers.
    #[must_use]
    pub const fn cache_scope(mut self, scope: CacheScope) -> Self {
        self.request.cache_scope = scope;
        self
    }

    /// Sets the disk cache TTL.
    #[must_use]
    pub const fn cache_duration(mut self, duration: Duration) -> Self {
        self.request.cache_duration = Some(duration);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.request.priority = priority;
        self
    }

    /// Sets the target view.
    #[must_use]
    pub const fn target(mut self, target: TargetHandle) -> Self {
        self.request.target = Some(target);
        self
    }

    /// Sets the loading placeholder.
    #[must_use]
    pub fn loading_placeholder(mut self, source: ImageSource) -> Self {
        self.request.loading_placeholder = Some(source);
        self
    }

    /// Sets the error placeholder.
    #[must_use]
    pub fn error_placeholder(mut self, source: ImageSource) -> Self {
        self.request.error_placeholder = Some(source);
        self
    }

    /// Finishes the request.
    #[must_use]
    pub fn build(self) -> ImageRequest {
        self.request
    }
}
