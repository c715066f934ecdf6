//! Disk cache journal format.
//!
//! ```text
//! PIXLOAD_JOURNAL
//! 1
//! c <key> <originMillis> <ttlMillis>
//! m <key> <originMillis> <ttlMillis>
//! d <key>
//! ```
//!
//! Replay stops at the first line that fails to parse; everything before it
//! stays authoritative.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::entities::CacheEntry;

/// Name of the journal file inside the cache directory.
pub const JOURNAL_FILE_NAME: &str = ".journal";

/// First header line.
pub const MAGIC: &str = "PIXLOAD_JOURNAL";

/// Second header line.
pub const VERSION: &str = "1";

/// Journal parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    /// Header missing or written by a different format.
    #[error("invalid journal header: {0}")]
    InvalidHeader(String),
    /// A record could not be parsed.
    #[error("malformed journal line {line}: {reason}")]
    MalformedLine {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
}

/// One journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// First write of a key.
    Created {
        /// Sanitized key.
        key: String,
        /// Write time.
        origin: DateTime<Utc>,
        /// Time to live.
        ttl: Duration,
    },
    /// Overwrite of a known key.
    Modified {
        /// Sanitized key.
        key: String,
        /// Write time.
        origin: DateTime<Utc>,
        /// Time to live.
        ttl: Duration,
    },
    /// Removal of a key.
    Deleted {
        /// Sanitized key.
        key: String,
    },
}

impl JournalRecord {
    /// Record describing `entry` as created or modified.
    #[must_use]
    pub fn for_entry(entry: &CacheEntry, modified: bool) -> Self {
        let key = entry.key.clone();
        let origin = entry.created_at;
        let ttl = entry.ttl;
        if modified {
            Self::Modified { key, origin, ttl }
        } else {
            Self::Created { key, origin, ttl }
        }
    }

    /// Serializes the record without a trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Created { key, origin, ttl } => {
                format!("c {key} {} {}", origin.timestamp_millis(), ttl_millis(*ttl))
            }
            Self::Modified { key, origin, ttl } => {
                format!("m {key} {} {}", origin.timestamp_millis(), ttl_millis(*ttl))
            }
            Self::Deleted { key } => format!("d {key}"),
        }
    }

    /// Parses one line.
    ///
    /// # Errors
    /// Returns a description of the problem if the line is not a record.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split(' ');
        let op = parts.next().unwrap_or_default();
        let key = parts
            .next()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "missing key".to_string())?
            .to_string();

        let record = match op {
            "d" => Self::Deleted { key },
            "c" | "m" => {
                let origin_ms: i64 = parts
                    .next()
                    .ok_or("missing origin")?
                    .parse()
                    .map_err(|e| format!("bad origin: {e}"))?;
                let ttl_ms: u64 = parts
                    .next()
                    .ok_or("missing ttl")?
                    .parse()
                    .map_err(|e| format!("bad ttl: {e}"))?;
                let origin = DateTime::<Utc>::from_timestamp_millis(origin_ms)
                    .ok_or("origin out of range")?;
                let ttl = Duration::from_millis(ttl_ms);
                if op == "c" {
                    Self::Created { key, origin, ttl }
                } else {
                    Self::Modified { key, origin, ttl }
                }
            }
            other => return Err(format!("unknown operation {other:?}")),
        };

        if parts.next().is_some() {
            return Err("trailing fields".to_string());
        }
        Ok(record)
    }

    /// Applies the record to an index.
    pub fn apply(self, entries: &mut HashMap<String, CacheEntry>) {
        match self {
            Self::Created { key, origin, ttl } | Self::Modified { key, origin, ttl } => {
                entries.insert(key.clone(), CacheEntry::new(key, origin, ttl));
            }
            Self::Deleted { key } => {
                entries.remove(&key);
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Header text including the trailing newline.
#[must_use]
pub fn header() -> String {
    format!("{MAGIC}\n{VERSION}\n")
}

/// Full journal text describing exactly `entries`.
#[must_use]
pub fn snapshot<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>) -> String {
    let mut text = header();
    for entry in entries {
        text.push_str(&JournalRecord::for_entry(entry, false).to_line());
        text.push('\n');
    }
    text
}

/// Result of replaying a journal.
#[derive(Debug, Default)]
pub struct Replay {
    /// Reconstructed index.
    pub entries: HashMap<String, CacheEntry>,
    /// Number of records applied.
    pub records: usize,
    /// First parse failure, if replay stopped early.
    pub stopped_at: Option<JournalError>,
}

impl Replay {
    /// Returns true if the journal holds lines past the replayed prefix.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.stopped_at.is_some()
    }
}

/// Replays journal text into an index.
///
/// # Errors
/// Returns [`JournalError::InvalidHeader`] if the header does not match.
pub fn replay(text: &str) -> Result<Replay, JournalError> {
    let mut lines = text.lines();
    match (lines.next(), lines.next()) {
        (Some(MAGIC), Some(VERSION)) => {}
        (magic, version) => {
            return Err(JournalError::InvalidHeader(format!(
                "expected {MAGIC}/{VERSION}, found {}/{}",
                magic.unwrap_or("<eof>"),
                version.unwrap_or("<eof>")
            )));
        }
    }

    let mut replay = Replay::default();
    for (index, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        match JournalRecord::parse(line) {
            Ok(record) => {
                record.apply(&mut replay.entries);
                replay.records += 1;
            }
            Err(reason) => {
                replay.stopped_at = Some(JournalError::MalformedLine {
                    line: index + 3,
                    reason,
                });
                break;
            }
        }
    }
    Ok(replay)
}
