//! Cache key derivation.
//!
//! A raw key names a logical resource; a full key names one rendered variant
//! of it (transformations plus downsample size).

use std::fmt;

use super::request::{Downsample, ImageRequest};

/// Separator between the raw key and variant signatures.
pub const KEY_SEPARATOR: char = ';';

/// Derived cache identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    raw: String,
    full: String,
}

impl CacheKey {
    /// Derives the key of a request.
    #[must_use]
    pub fn derive(request: &ImageRequest) -> Self {
        let raw = request
            .usable_custom_key()
            .map_or_else(|| request.source.identifier(), str::to_string);
        let transformation_keys: Vec<String> =
            request.transformations.iter().map(|t| t.key()).collect();
        Self::from_parts(raw, &transformation_keys, request.downsample)
    }

    /// Builds a key from its parts.
    ///
    /// Without transformations or downsampling the full key equals the raw key.
    #[must_use]
    pub fn from_parts(
        raw: impl Into<String>,
        transformation_keys: &[String],
        downsample: Option<Downsample>,
    ) -> Self {
        let raw = raw.into();
        if transformation_keys.is_empty() && downsample.is_none() {
            return Self {
                full: raw.clone(),
                raw,
            };
        }

        let (width, height) = downsample.map_or((0, 0), |d| (d.width, d.height));
        let mut full = raw.clone();
        full.push(KEY_SEPARATOR);
        full.push_str(&transformation_keys.join(&KEY_SEPARATOR.to_string()));
        full.push(KEY_SEPARATOR);
        full.push_str(&format!("{width}x{height}"));

        Self { raw, full }
    }

    /// Key of the logical resource.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Key of this specific variant.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Returns true if the key identifies nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns true if `full_key` is `raw_key` itself or one of its variants.
    #[must_use]
    pub fn is_variant_of(full_key: &str, raw_key: &str) -> bool {
        full_key
            .strip_prefix(raw_key)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(KEY_SEPARATOR))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
