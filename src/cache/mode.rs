use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::CacheMode;
use crate::storage::{Durability, Storage, StorageKey};

/// Resolves the global [`CacheMode`].
///
/// Precedence: the operator override, then the process-local value while it
/// is younger than the TTL, then the persisted value, then `ReadWrite`.
/// Other instances see a change only after their local value expires or is
/// invalidated; there is no push between instances.
pub struct CacheModeController {
    storage: Storage,
    forced: Option<CacheMode>,
    ttl: Option<Duration>,
    cached: Mutex<Option<(CacheMode, Instant)>>,
}

impl CacheModeController {
    /// `ttl` of `None` keeps the local value until [`invalidate`](Self::invalidate).
    pub fn new(storage: Storage, forced: Option<CacheMode>, ttl: Option<Duration>) -> Self {
        if let Some(mode) = forced {
            warn!("Cache mode forced to {} by environment", mode);
        }
        Self {
            storage,
            forced,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn forced(&self) -> Option<CacheMode> {
        self.forced
    }

    pub async fn get(&self) -> CacheMode {
        if let Some(mode) = self.forced {
            return mode;
        }

        let mut cached = self.cached.lock().await;
        if let Some((mode, resolved_at)) = *cached {
            let fresh = self.ttl.map_or(true, |ttl| resolved_at.elapsed() < ttl);
            if fresh {
                return mode;
            }
        }

        let mode = self.load().await;
        *cached = Some((mode, Instant::now()));
        mode
    }

    async fn load(&self) -> CacheMode {
        match self.storage.get(&StorageKey::CacheMode).await {
            Some(raw) => match raw.parse() {
                Ok(mode) => {
                    debug!("Loaded persisted cache mode {}", mode);
                    mode
                }
                Err(e) => {
                    warn!("Ignoring persisted cache mode: {}", e);
                    CacheMode::default()
                }
            },
            None => CacheMode::default(),
        }
    }

    /// Persist `mode`, then adopt it locally.
    pub async fn set(&self, mode: CacheMode) -> Result<()> {
        self.storage
            .put(&StorageKey::CacheMode, mode.as_str(), Durability::Mutable)
            .await?;
        *self.cached.lock().await = Some((mode, Instant::now()));

        if let Some(forced) = self.forced {
            warn!("Cache mode set to {} but {} is forced by environment", mode, forced);
        } else {
            info!("Cache mode set to {}", mode);
        }
        Ok(())
    }

    /// Drop the local value so the next read goes to storage.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
