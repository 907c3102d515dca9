use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::freshness::is_permanent_cache_eligible;
use crate::models::{Article, DailyPayload};
use crate::storage::{Durability, Storage, StorageKey};

/// Per-date merged payloads.
///
/// Two write paths exist and must not be mixed: [`put_from_scrape`] stamps
/// `cachedAt` and is the only thing that advances freshness, while
/// [`put_user_update`] keeps whatever `cachedAt` is already stored.
///
/// [`put_from_scrape`]: PayloadStore::put_from_scrape
/// [`put_user_update`]: PayloadStore::put_user_update
pub struct PayloadStore {
    storage: Storage,
    repository: Arc<Repository>,
    namespace: String,
}

impl PayloadStore {
    pub fn new(storage: Storage, repository: Arc<Repository>, namespace: &str) -> Self {
        Self {
            storage,
            repository,
            namespace: namespace.to_string(),
        }
    }

    fn key(&self, date: NaiveDate) -> StorageKey {
        StorageKey::payload(&self.namespace, date)
    }

    fn durability(date: NaiveDate) -> Durability {
        if is_permanent_cache_eligible(date, Utc::now().date_naive()) {
            Durability::Finalized
        } else {
            Durability::Mutable
        }
    }

    /// Fastest available copy, for display.
    pub async fn get(&self, date: NaiveDate) -> Option<DailyPayload> {
        self.storage.get_json(&self.key(date)).await
    }

    /// Copy to modify: the durable store first, so a secondary whose copy
    /// could not be updated or dropped never feeds a read-modify-write.
    pub async fn get_authoritative(&self, date: NaiveDate) -> Option<DailyPayload> {
        self.storage.get_json_authoritative(&self.key(date)).await
    }

    /// Payloads for `start..=end` keyed by date.
    ///
    /// Each date is looked up in the caches first; whatever they miss comes
    /// from a single durable range query, or per-date reads if that fails.
    pub async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> BTreeMap<NaiveDate, DailyPayload> {
        let mut payloads = BTreeMap::new();
        let mut missing = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            match self.storage.get_json_cached::<DailyPayload>(&self.key(date)).await {
                Some(payload) => {
                    payloads.insert(date, payload);
                }
                None => missing.push(date),
            }
        }
        let (Some(&first), Some(&last)) = (missing.first(), missing.last()) else {
            return payloads;
        };

        match self
            .repository
            .get_daily_payloads_range(&self.namespace, first, last)
            .await
        {
            Ok(rows) => {
                for payload in rows {
                    if missing.contains(&payload.date) {
                        payloads.insert(payload.date, payload);
                    }
                }
            }
            Err(e) => {
                warn!("Durable range query failed, reading per date: {}", e);
                for date in missing {
                    if let Some(payload) = self.get(date).await {
                        payloads.insert(date, payload);
                    }
                }
            }
        }
        payloads
    }

    /// Persist scrape output, advancing `cachedAt` to `now`.
    pub async fn put_from_scrape(&self, mut payload: DailyPayload, now: DateTime<Utc>) -> Result<DailyPayload> {
        payload.cached_at = Some(now);
        self.storage
            .put_json(&self.key(payload.date), &payload, Self::durability(payload.date))
            .await?;
        debug!("Stored scraped payload for {} ({} articles)", payload.date, payload.articles.len());
        Ok(payload)
    }

    /// Persist a user-state change without touching freshness.
    pub async fn put_user_update(&self, mut payload: DailyPayload) -> Result<DailyPayload> {
        if let Some(stored) = self.get_authoritative(payload.date).await {
            payload.cached_at = stored.cached_at;
        }
        self.storage
            .put_json(&self.key(payload.date), &payload, Self::durability(payload.date))
            .await?;
        Ok(payload)
    }

    /// Read-modify-write of one article's state.
    pub async fn update_article<F>(&self, date: NaiveDate, canonical_url: &str, f: F) -> Result<Article>
    where
        F: FnOnce(&mut Article),
    {
        let mut payload = self
            .get_authoritative(date)
            .await
            .ok_or_else(|| AppError::NotFound(format!("no payload for {}", date)))?;

        let article = payload.find_article_mut(canonical_url).ok_or_else(|| {
            AppError::NotFound(format!("{} not found on {}", canonical_url, date))
        })?;
        f(article);
        let updated = article.clone();

        self.put_user_update(payload).await?;
        Ok(updated)
    }
}
