//! Uniform get/put over the durable store, the blob store and the edge
//! key-value store.
//!
//! Each backend implements [`Backend`]. [`Storage`] holds them in
//! fastest-first order: reads fall through on any miss or error, and writes
//! fail only when the primary backend fails.

mod blob;
mod chain;
mod edge;
mod memory;
mod retry;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Effort;

pub use blob::BlobStore;
pub use chain::Storage;
pub use edge::{EdgeReader, EdgeStore, EdgeWriter};
pub use memory::MemoryBackend;
pub use retry::{retry_transient, RetryConfig};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("{backend} does not hold {key}")]
    Unsupported { backend: &'static str, key: String },
    #[error("value of {size} bytes exceeds the {backend} limit of {limit}")]
    TooLarge {
        backend: &'static str,
        size: usize,
        limit: usize,
    },
    #[error("{backend} returned HTTP {status}")]
    Status { backend: &'static str, status: u16 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{backend} still holds {key} after a failed delete")]
    Stale { backend: &'static str, key: String },
    #[error("{0}")]
    Backend(String),
}

impl StorageError {
    /// Failures worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transport(_) => true,
            StorageError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// A logical storage location, rendered per backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Merged articles plus user state for one date.
    Payload { namespace: String, date: NaiveDate },
    /// Raw scrape output for one date.
    DayScrape { namespace: String, date: NaiveDate },
    CacheMode,
    RemovedPointer,
    RemovedSnapshot { epoch_ms: i64 },
    /// Fetched article text, addressed by URL pathname.
    Content { pathname: String },
    Summary {
        pathname: String,
        effort: Option<Effort>,
    },
}

impl StorageKey {
    pub const REMOVED_SNAPSHOT_PREFIX: &'static str = "removed-urls-";

    pub fn payload(namespace: &str, date: NaiveDate) -> Self {
        StorageKey::Payload {
            namespace: namespace.to_string(),
            date,
        }
    }

    pub fn day_scrape(namespace: &str, date: NaiveDate) -> Self {
        StorageKey::DayScrape {
            namespace: namespace.to_string(),
            date,
        }
    }

    /// Summary key; the default effort keeps the short `{hash}-summary.md` form.
    pub fn summary(pathname: &str, effort: Effort) -> Self {
        StorageKey::Summary {
            pathname: pathname.to_string(),
            effort: (effort != Effort::default()).then_some(effort),
        }
    }

    /// Object-store pathname (also used as the durable document key).
    pub fn pathname(&self) -> String {
        match self {
            StorageKey::Payload { namespace, date } => {
                format!("newsletter-{}-{}.json", namespace, date)
            }
            StorageKey::DayScrape { namespace, date } => {
                format!("tldr-scraper-cache/{}/{}.json", namespace, date)
            }
            StorageKey::CacheMode => "cache-mode.txt".to_string(),
            StorageKey::RemovedPointer => "removed-urls.current.txt".to_string(),
            StorageKey::RemovedSnapshot { epoch_ms } => {
                format!("{}{}.json", Self::REMOVED_SNAPSHOT_PREFIX, epoch_ms)
            }
            StorageKey::Content { pathname } => format!("{}.md", pathname),
            StorageKey::Summary {
                pathname,
                effort: None,
            } => format!("{}-summary.md", pathname),
            StorageKey::Summary {
                pathname,
                effort: Some(effort),
            } => format!("{}-summary-{}.md", pathname, effort),
        }
    }

    /// Small mutable keys that steer every other read. These are read from
    /// the authoritative backend first so a secondary that missed an update
    /// can never hand back an older value.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            StorageKey::CacheMode | StorageKey::RemovedPointer | StorageKey::RemovedSnapshot { .. }
        )
    }

    /// Edge-store key; only per-date payloads live in the edge store.
    pub fn edge_key(&self) -> Option<String> {
        match self {
            StorageKey::Payload { namespace, date } => Some(format!("{}-{}", date, namespace)),
            StorageKey::DayScrape { namespace, date } => {
                Some(format!("tldr-cache:{}:{}", namespace, date))
            }
            _ => None,
        }
    }

    /// Recover a snapshot key from its pathname.
    pub fn parse_removed_snapshot(pathname: &str) -> Option<StorageKey> {
        let epoch = pathname
            .strip_prefix(Self::REMOVED_SNAPSHOT_PREFIX)?
            .strip_suffix(".json")?;
        epoch
            .parse()
            .ok()
            .map(|epoch_ms| StorageKey::RemovedSnapshot { epoch_ms })
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pathname())
    }
}

/// Whether a write may be served from caches that are expensive to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Data that may still change (recent dates, pointers, settings).
    Mutable,
    /// Data for a settled date that can be cached indefinitely.
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Source of truth; its write failures are the caller's failures.
    pub authoritative: bool,
    pub listing: bool,
    /// Only accepts [`Durability::Finalized`] writes.
    pub finalized_only: bool,
    pub max_value_bytes: Option<usize>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Whether this backend has an address for `key` at all.
    fn holds(&self, key: &StorageKey) -> bool;

    /// Read path configured (credentials present).
    fn can_read(&self) -> bool;

    /// Write path configured (credentials present).
    fn can_write(&self) -> bool;

    /// `Ok(None)` is an expected miss; `Err` is a real failure.
    async fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError>;

    async fn put(&self, key: &StorageKey, value: &str) -> Result<(), StorageError>;

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Pathnames starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported {
            backend: self.name(),
            key: format!("{}*", prefix),
        })
    }
}
