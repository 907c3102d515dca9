use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Backend, Capabilities, StorageError, StorageKey};

/// Process-local backend keyed by pathname.
///
/// Stands in for the blob or edge store when no credentials are configured,
/// and supports fault injection so fallback paths can be exercised.
pub struct MemoryBackend {
    name: &'static str,
    capabilities: Capabilities,
    edge_keys_only: bool,
    data: Mutex<BTreeMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            capabilities: Capabilities {
                listing: true,
                ..Capabilities::default()
            },
            edge_keys_only: false,
            data: Mutex::new(BTreeMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Only hold keys that have an edge-store address.
    pub fn edge_keys_only(mut self) -> Self {
        self.edge_keys_only = true;
        self
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.entries().contains_key(&key.pathname())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a value directly, bypassing fault injection.
    pub fn seed(&self, key: &StorageKey, value: &str) {
        self.entries().insert(key.pathname(), value.to_string());
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still a valid map.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn injected(&self, op: &str) -> StorageError {
        StorageError::Backend(format!("{} {} failure (injected)", self.name, op))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn holds(&self, key: &StorageKey) -> bool {
        !self.edge_keys_only || key.edge_key().is_some()
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        true
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(self.injected("read"));
        }
        Ok(self.entries().get(&key.pathname()).cloned())
    }

    async fn put(&self, key: &StorageKey, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.injected("write"));
        }
        if let Some(limit) = self.capabilities.max_value_bytes {
            if value.len() > limit {
                return Err(StorageError::TooLarge {
                    backend: self.name,
                    size: value.len(),
                    limit,
                });
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries().insert(key.pathname(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(self.injected("delete"));
        }
        self.entries().remove(&key.pathname());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
