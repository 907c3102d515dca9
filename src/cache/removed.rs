use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::storage::{Durability, Storage, StorageKey};
use crate::urls::canonicalize_url;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub canonical_url: String,
    pub size: usize,
    pub already_present: bool,
    /// Whether a read-back after the write saw the new URL.
    pub visible: bool,
}

/// Global blocklist of canonical URLs, versioned by pointer and snapshot.
///
/// Each change writes a complete new snapshot under a fresh key and only
/// then repoints `removed-urls.current.txt` at it, so a reader never sees a
/// half-written set. There is no compare-and-swap on the pointer: two
/// concurrent adds can lose one of them.
pub struct RemovedUrlStore {
    storage: Storage,
}

impl RemovedUrlStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Snapshot currently named by the pointer.
    pub async fn current_pointer(&self) -> Option<StorageKey> {
        let raw = self.storage.get(&StorageKey::RemovedPointer).await?;
        let key = StorageKey::parse_removed_snapshot(raw.trim());
        if key.is_none() {
            warn!("Ignoring malformed removed-urls pointer: {:?}", raw.trim());
        }
        key
    }

    async fn load(&self, pointer: Option<&StorageKey>) -> BTreeSet<String> {
        match pointer {
            Some(key) => self
                .storage
                .get_json::<BTreeSet<String>>(key)
                .await
                .unwrap_or_default(),
            None => BTreeSet::new(),
        }
    }

    pub async fn urls(&self) -> BTreeSet<String> {
        let pointer = self.current_pointer().await;
        self.load(pointer.as_ref()).await
    }

    pub async fn add(&self, url: &str) -> Result<AddOutcome> {
        let canonical_url = canonicalize_url(url);
        if canonical_url.is_empty() {
            return Err(AppError::Validation("url is required".to_string()));
        }

        let old_pointer = self.current_pointer().await;
        let mut urls = self.load(old_pointer.as_ref()).await;

        if !urls.insert(canonical_url.clone()) {
            debug!("{} already in removed list", canonical_url);
            return Ok(AddOutcome {
                canonical_url,
                size: urls.len(),
                already_present: true,
                visible: true,
            });
        }

        let mut epoch_ms = Utc::now().timestamp_millis();
        if let Some(StorageKey::RemovedSnapshot { epoch_ms: old }) = old_pointer {
            epoch_ms = epoch_ms.max(old + 1);
        }
        let snapshot = StorageKey::RemovedSnapshot { epoch_ms };

        self.storage
            .put_json(&snapshot, &urls, Durability::Mutable)
            .await?;
        self.storage
            .put(&StorageKey::RemovedPointer, &snapshot.pathname(), Durability::Mutable)
            .await?;

        if let Some(old) = old_pointer {
            if let Err(e) = self.storage.delete(&old).await {
                warn!("Failed to delete superseded snapshot {}: {}", old, e);
            }
        }

        let visible = self.urls().await.contains(&canonical_url);
        if visible {
            info!("Removed {} ({} urls in {})", canonical_url, urls.len(), snapshot);
        } else {
            warn!("Removed {} but read-back does not show it yet", canonical_url);
        }

        Ok(AddOutcome {
            canonical_url,
            size: urls.len(),
            already_present: false,
            visible,
        })
    }

    /// Delete snapshots older than the current one. Newer snapshots may
    /// belong to an add still in flight and are left alone.
    pub async fn collect_garbage(&self) -> usize {
        let Some(StorageKey::RemovedSnapshot { epoch_ms: current }) = self.current_pointer().await
        else {
            return 0;
        };

        let mut deleted = 0;
        for pathname in self.storage.list(StorageKey::REMOVED_SNAPSHOT_PREFIX).await {
            let Some(key @ StorageKey::RemovedSnapshot { epoch_ms }) =
                StorageKey::parse_removed_snapshot(&pathname)
            else {
                continue;
            };
            if epoch_ms >= current {
                continue;
            }
            match self.storage.delete(&key).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete {}: {}", key, e),
            }
        }
        deleted
    }
}
