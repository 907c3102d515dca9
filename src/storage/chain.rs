use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::{retry_transient, Backend, Durability, RetryConfig, StorageError, StorageKey};

/// Ordered fallback chain over every configured backend.
///
/// Backends are listed fastest first. A read returns the first hit and
/// treats errors, 404s and missing credentials as misses. Control keys
/// (see [`StorageKey::is_control`]) are read from the authoritative backend
/// first. A write goes to every backend that holds the key; only the
/// primary's failure is returned, and a secondary that missed the write has
/// its copy dropped so it cannot serve the old value.
#[derive(Clone)]
pub struct Storage {
    backends: Vec<Arc<dyn Backend>>,
    retry: RetryConfig,
}

impl Storage {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            backends,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Raw value from the first backend that has it.
    pub async fn get(&self, key: &StorageKey) -> Option<String> {
        self.get_parsed(key, |raw| Some(raw.to_string())).await
    }

    /// Deserialized value from the first backend holding a valid copy.
    /// A corrupt copy counts as a miss for that backend only.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &StorageKey) -> Option<T> {
        self.get_parsed(key, |raw| Self::parse_json(key, raw)).await
    }

    /// Like [`get_json`](Self::get_json) but only from non-authoritative
    /// backends, for callers that query the durable store in bulk.
    pub async fn get_json_cached<T: DeserializeOwned>(&self, key: &StorageKey) -> Option<T> {
        let readers: Vec<_> = self
            .readers(key)
            .into_iter()
            .filter(|b| !b.capabilities().authoritative)
            .collect();
        Self::first_parsed(&readers, key, &self.retry, |raw| Self::parse_json(key, raw)).await
    }

    /// Value from the authoritative backend, falling back to the rest only
    /// when it misses or fails. Used for read-modify-write.
    pub async fn get_json_authoritative<T: DeserializeOwned>(&self, key: &StorageKey) -> Option<T> {
        let mut readers = self.readers(key);
        readers.sort_by_key(|b| !b.capabilities().authoritative);
        Self::first_parsed(&readers, key, &self.retry, |raw| Self::parse_json(key, raw)).await
    }

    fn parse_json<T: DeserializeOwned>(key: &StorageKey, raw: &str) -> Option<T> {
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding unreadable {}: {}", key, e);
                None
            }
        }
    }

    async fn get_parsed<T>(&self, key: &StorageKey, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let readers = self.readers(key);
        Self::first_parsed(&readers, key, &self.retry, parse).await
    }

    async fn first_parsed<T>(
        readers: &[Arc<dyn Backend>],
        key: &StorageKey,
        retry: &RetryConfig,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        for backend in readers {
            let op = format!("{} get {}", backend.name(), key);
            match retry_transient(&op, retry, || backend.get(key)).await {
                Ok(Some(raw)) => {
                    if let Some(value) = parse(&raw) {
                        debug!("Cache hit for {} in {}", key, backend.name());
                        return Some(value);
                    }
                }
                Ok(None) => debug!("Cache miss for {} in {}", key, backend.name()),
                Err(e) => warn!("Read of {} from {} failed, falling back: {}", key, backend.name(), e),
            }
        }
        None
    }

    pub async fn put_json<T: Serialize>(
        &self,
        key: &StorageKey,
        value: &T,
        durability: Durability,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.put(key, &raw, durability).await
    }

    /// Write to the primary backend, then best-effort to the rest.
    pub async fn put(
        &self,
        key: &StorageKey,
        value: &str,
        durability: Durability,
    ) -> Result<(), StorageError> {
        let targets = self.writers(key, durability);
        let Some(primary) = Self::primary(&targets) else {
            return Err(StorageError::NotConfigured("writable backend"));
        };

        if let Err(e) = targets[primary].put(key, value).await {
            error!("Primary write of {} to {} failed: {}", key, targets[primary].name(), e);
            return Err(e);
        }

        for (_, backend) in targets.iter().enumerate().filter(|(i, _)| *i != primary) {
            if let Some(limit) = backend.capabilities().max_value_bytes {
                if value.len() > limit {
                    debug!(
                        "Skipping {} for {}: {} bytes over limit {}",
                        backend.name(),
                        key,
                        value.len(),
                        limit
                    );
                    continue;
                }
            }
            if let Err(e) = backend.put(key, value).await {
                warn!("Secondary write of {} to {} failed: {}", key, backend.name(), e);
                if let Err(e) = backend.delete(key).await {
                    error!("{} may serve a stale {}: {}", backend.name(), key, e);
                }
            }
        }

        Ok(())
    }

    /// Delete everywhere. The primary's failure is returned first; a
    /// secondary left holding the key is reported as [`StorageError::Stale`]
    /// so the caller can retry instead of trusting the deletion.
    pub async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let targets: Vec<_> = self
            .backends
            .iter()
            .filter(|b| b.can_write() && b.holds(key))
            .cloned()
            .collect();
        let Some(primary) = Self::primary(&targets) else {
            return Err(StorageError::NotConfigured("writable backend"));
        };

        let mut result = targets[primary].delete(key).await;
        for (_, backend) in targets.iter().enumerate().filter(|(i, _)| *i != primary) {
            if let Err(e) = backend.delete(key).await {
                warn!("Delete of {} from {} failed: {}", key, backend.name(), e);
                if result.is_ok() {
                    result = Err(StorageError::Stale {
                        backend: backend.name(),
                        key: key.pathname(),
                    });
                }
            }
        }
        result
    }

    /// Pathnames under `prefix` from the first backend able to list them.
    pub async fn list(&self, prefix: &str) -> Vec<String> {
        for backend in self
            .backends
            .iter()
            .filter(|b| b.can_read() && b.capabilities().listing)
        {
            match backend.list(prefix).await {
                Ok(paths) => return paths,
                Err(e) => warn!("Listing {} on {} failed: {}", prefix, backend.name(), e),
            }
        }
        Vec::new()
    }

    fn readers(&self, key: &StorageKey) -> Vec<Arc<dyn Backend>> {
        let mut readers: Vec<_> = self
            .backends
            .iter()
            .filter(|b| b.can_read() && b.holds(key))
            .cloned()
            .collect();
        if key.is_control() {
            // Stable: secondaries keep their relative order.
            readers.sort_by_key(|b| !b.capabilities().authoritative);
        }
        readers
    }

    fn writers(&self, key: &StorageKey, durability: Durability) -> Vec<Arc<dyn Backend>> {
        self.backends
            .iter()
            .filter(|b| b.can_write() && b.holds(key))
            .filter(|b| durability == Durability::Finalized || !b.capabilities().finalized_only)
            .cloned()
            .collect()
    }

    /// Index of the first authoritative target, else the first target.
    fn primary(targets: &[Arc<dyn Backend>]) -> Option<usize> {
        targets
            .iter()
            .position(|b| b.capabilities().authoritative)
            .or(if targets.is_empty() { None } else { Some(0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Capabilities, MemoryBackend};
    use chrono::NaiveDate;

    struct Fixture {
        edge: Arc<MemoryBackend>,
        blob: Arc<MemoryBackend>,
        durable: Arc<MemoryBackend>,
        storage: Storage,
    }

    fn fixture() -> Fixture {
        let edge = Arc::new(
            MemoryBackend::new("edge")
                .edge_keys_only()
                .with_capabilities(Capabilities {
                    finalized_only: true,
                    max_value_bytes: Some(64),
                    ..Capabilities::default()
                }),
        );
        let blob = Arc::new(MemoryBackend::new("blob"));
        let durable = Arc::new(MemoryBackend::new("durable").with_capabilities(Capabilities {
            authoritative: true,
            ..Capabilities::default()
        }));
        let storage = Storage::new(vec![
            edge.clone() as Arc<dyn Backend>,
            blob.clone() as Arc<dyn Backend>,
            durable.clone() as Arc<dyn Backend>,
        ])
            .with_retry(RetryConfig::test());
        Fixture {
            edge,
            blob,
            durable,
            storage,
        }
    }

    fn payload_key() -> StorageKey {
        StorageKey::payload("tldr", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn read_prefers_fastest_backend() {
        let f = fixture();
        f.edge.seed(&payload_key(), "edge");
        f.durable.seed(&payload_key(), "durable");

        assert_eq!(f.storage.get(&payload_key()).await.as_deref(), Some("edge"));
        assert_eq!(f.durable.read_count(), 0);
    }

    #[tokio::test]
    async fn read_errors_fall_through_to_next_backend() {
        let f = fixture();
        f.edge.fail_reads(true);
        f.blob.fail_reads(true);
        f.durable.seed(&payload_key(), "durable");

        assert_eq!(f.storage.get(&payload_key()).await.as_deref(), Some("durable"));
    }

    #[tokio::test]
    async fn all_failures_read_as_miss() {
        let f = fixture();
        f.edge.fail_reads(true);
        f.blob.fail_reads(true);
        f.durable.fail_reads(true);

        assert_eq!(f.storage.get(&payload_key()).await, None);
    }

    #[tokio::test]
    async fn corrupt_copy_falls_through() {
        let f = fixture();
        f.blob.seed(&payload_key(), "{not json");
        f.durable.seed(&payload_key(), "[1,2]");

        let value: Option<Vec<i32>> = f.storage.get_json(&payload_key()).await;
        assert_eq!(value, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn secondary_write_failure_does_not_fail_caller() {
        let f = fixture();
        f.blob.fail_writes(true);

        f.storage
            .put(&StorageKey::CacheMode, "read_only", Durability::Mutable)
            .await
            .unwrap();
        assert!(f.durable.contains(&StorageKey::CacheMode));
    }

    #[tokio::test]
    async fn failed_secondary_write_drops_its_stale_copy() {
        let f = fixture();
        f.storage.put(&payload_key(), "old", Durability::Mutable).await.unwrap();

        f.blob.fail_writes(true);
        f.storage.put(&payload_key(), "new", Durability::Mutable).await.unwrap();

        assert!(!f.blob.contains(&payload_key()));
        assert_eq!(f.storage.get(&payload_key()).await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn control_keys_read_authoritative_first() {
        let f = fixture();
        f.blob.seed(&StorageKey::RemovedPointer, "stale");
        f.durable.seed(&StorageKey::RemovedPointer, "current");
        f.blob.seed(&payload_key(), "blob");
        f.durable.seed(&payload_key(), "durable");

        assert_eq!(f.storage.get(&StorageKey::RemovedPointer).await.as_deref(), Some("current"));
        assert_eq!(f.storage.get(&payload_key()).await.as_deref(), Some("blob"));
    }

    #[tokio::test]
    async fn control_keys_fall_back_when_durable_fails() {
        let f = fixture();
        f.blob.seed(&StorageKey::CacheMode, "read_only");
        f.durable.fail_reads(true);

        assert_eq!(f.storage.get(&StorageKey::CacheMode).await.as_deref(), Some("read_only"));
    }

    #[tokio::test]
    async fn authoritative_and_cached_reads() {
        let f = fixture();
        f.blob.seed(&payload_key(), "[1]");
        f.durable.seed(&payload_key(), "[2]");

        let fastest: Option<Vec<i32>> = f.storage.get_json(&payload_key()).await;
        let durable: Option<Vec<i32>> = f.storage.get_json_authoritative(&payload_key()).await;
        assert_eq!(fastest, Some(vec![1]));
        assert_eq!(durable, Some(vec![2]));

        f.blob.fail_reads(true);
        let cached: Option<Vec<i32>> = f.storage.get_json_cached(&payload_key()).await;
        assert_eq!(cached, None);
    }

    #[tokio::test]
    async fn secondary_delete_failure_is_reported() {
        let f = fixture();
        f.storage.put(&payload_key(), "{}", Durability::Mutable).await.unwrap();
        f.blob.fail_deletes(true);

        let result = f.storage.delete(&payload_key()).await;
        assert!(matches!(result, Err(StorageError::Stale { backend: "blob", .. })));
        assert!(!f.durable.contains(&payload_key()));
    }

    #[tokio::test]
    async fn primary_write_failure_is_returned() {
        let f = fixture();
        f.durable.fail_writes(true);

        let result = f
            .storage
            .put(&StorageKey::CacheMode, "read_only", Durability::Mutable)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mutable_writes_skip_finalized_only_backends() {
        let f = fixture();

        f.storage.put(&payload_key(), "{}", Durability::Mutable).await.unwrap();
        assert!(!f.edge.contains(&payload_key()));
        assert!(f.blob.contains(&payload_key()));

        f.storage.put(&payload_key(), "{}", Durability::Finalized).await.unwrap();
        assert!(f.edge.contains(&payload_key()));
    }

    #[tokio::test]
    async fn oversized_values_skip_limited_backends() {
        let f = fixture();
        let big = "x".repeat(100);

        f.storage.put(&payload_key(), &big, Durability::Finalized).await.unwrap();
        assert!(!f.edge.contains(&payload_key()));
        assert!(f.durable.contains(&payload_key()));
    }

    #[tokio::test]
    async fn keys_without_edge_address_never_reach_edge() {
        let f = fixture();
        f.storage
            .put(&StorageKey::RemovedPointer, "p", Durability::Finalized)
            .await
            .unwrap();
        assert!(!f.edge.contains(&StorageKey::RemovedPointer));
    }

    #[tokio::test]
    async fn no_writable_backend_is_an_error() {
        let storage = Storage::new(Vec::new());
        assert!(matches!(
            storage.put(&StorageKey::CacheMode, "x", Durability::Mutable).await,
            Err(StorageError::NotConfigured(_))
        ));
    }
}
