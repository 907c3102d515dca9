use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::ai::{system_prompt, Summarize, Summarizer};
use crate::cache::{AddOutcome, CacheModeController, DayCache, PayloadStore, RemovedUrlStore};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{FeedAdapter, SourceAdapter};
use crate::models::{Article, CacheMode, DailyPayload, Effort};
use crate::scrape::{validate_range, ScrapeOutcome, Scraper};
use crate::services::{ContentFetcher, ContentSource, SummaryOutcome, TldrService};
use crate::storage::{Backend, BlobStore, EdgeReader, EdgeStore, EdgeWriter, Storage};
use crate::urls::canonicalize_url;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheModeReport {
    pub mode: CacheMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<CacheMode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    #[serde(flatten)]
    pub removed: AddOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article: Option<Article>,
}

/// Everything a request needs, built once per process.
pub struct App {
    pub config: Config,
    mode: Arc<CacheModeController>,
    payloads: Arc<PayloadStore>,
    day_cache: Arc<DayCache>,
    removed: Arc<RemovedUrlStore>,
    scraper: Scraper,
    tldr: TldrService,
}

/// External collaborators, replaceable in tests.
pub struct Components {
    pub backends: Vec<Arc<dyn Backend>>,
    pub repository: Arc<Repository>,
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
    pub content: Arc<dyn ContentSource>,
    pub summarizer: Option<Arc<dyn Summarize>>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path).await?);

        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
        if let Some(edge) = edge_store(&config) {
            backends.push(Arc::new(edge));
        }
        if let Some(blob) = blob_store(&config) {
            backends.push(Arc::new(blob));
        }
        backends.push(repository.clone());

        let adapters = config
            .sources
            .iter()
            .map(|source| {
                Arc::new(FeedAdapter::new(source.clone(), &config.namespace)) as Arc<dyn SourceAdapter>
            })
            .collect();

        let summarizer = match &config.claude_api_key {
            Some(key) => Some(Arc::new(Summarizer::new(key.clone())?) as Arc<dyn Summarize>),
            None => None,
        };

        let components = Components {
            backends,
            repository,
            adapters,
            content: Arc::new(ContentFetcher::new()?),
            summarizer,
        };
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: Config, components: Components) -> Self {
        let storage = Storage::new(components.backends);
        info!("Storage chain: {}", storage.backend_names().join(" -> "));

        let ttl = Duration::from_secs(config.mode_cache_ttl_secs);
        let mode = Arc::new(CacheModeController::new(storage.clone(), config.force_cache_mode, Some(ttl)));
        let payloads = Arc::new(PayloadStore::new(
            storage.clone(),
            components.repository,
            &config.namespace,
        ));
        let day_cache = Arc::new(DayCache::new(storage.clone(), &config.namespace, components.adapters));
        let removed = Arc::new(RemovedUrlStore::new(storage.clone()));

        let scraper = Scraper::new(payloads.clone(), day_cache.clone(), removed.clone(), mode.clone())
            .with_per_day_cap(config.per_day_cap)
            .with_max_range_days(config.max_range_days);
        let tldr = TldrService::new(storage, payloads.clone(), components.content, components.summarizer);

        Self {
            config,
            mode,
            payloads,
            day_cache,
            removed,
            scraper,
            tldr,
        }
    }

    // Scraping

    pub async fn scrape(&self, start: NaiveDate, end: NaiveDate) -> Result<ScrapeOutcome> {
        self.scraper.scrape_range(start, end).await
    }

    /// Drop the raw day cache for every date in range. Payloads, and the
    /// user state in them, are kept.
    pub async fn invalidate_cache(&self, start: NaiveDate, end: NaiveDate) -> Result<usize> {
        validate_range(start, end, self.config.max_range_days)?;
        let mut count = 0;
        for date in start.iter_days().take_while(|d| *d <= end) {
            self.day_cache.invalidate(date).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn invalidate_date_cache(&self, date: NaiveDate) -> Result<()> {
        self.day_cache.invalidate(date).await
    }

    // Cache mode

    pub async fn cache_mode(&self) -> CacheModeReport {
        CacheModeReport {
            mode: self.mode.get().await,
            forced: self.mode.forced(),
        }
    }

    pub async fn set_cache_mode(&self, mode: CacheMode) -> Result<CacheModeReport> {
        self.mode.set(mode).await?;
        Ok(self.cache_mode().await)
    }

    pub async fn invalidate_cache_mode(&self) {
        self.mode.invalidate().await;
    }

    /// Stored payload for `date`, unfiltered.
    pub async fn payload(&self, date: NaiveDate) -> Option<DailyPayload> {
        self.payloads.get_authoritative(date).await
    }

    // Article state

    /// Add `url` to the global blocklist and, with a date, also mark the
    /// article removed on that day.
    pub async fn remove_url(&self, url: &str, date: Option<NaiveDate>) -> Result<RemoveOutcome> {
        let removed = self.removed.add(url).await?;

        let article = match date {
            Some(date) => match self.remove_article(date, url).await {
                Ok(article) => Some(article),
                Err(AppError::NotFound(e)) => {
                    warn!("Blocklisted {} but could not flag it: {}", removed.canonical_url, e);
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(RemoveOutcome { removed, article })
    }

    pub async fn removed_urls(&self) -> BTreeSet<String> {
        self.removed.urls().await
    }

    pub async fn collect_removed_garbage(&self) -> usize {
        self.removed.collect_garbage().await
    }

    pub async fn remove_article(&self, date: NaiveDate, url: &str) -> Result<Article> {
        let canonical_url = require_url(url)?;
        self.payloads
            .update_article(date, &canonical_url, |article| article.removed = true)
            .await
    }

    pub async fn mark_read(&self, date: NaiveDate, url: &str, is_read: bool) -> Result<Article> {
        let canonical_url = require_url(url)?;
        let now = Utc::now();
        self.payloads
            .update_article(date, &canonical_url, |article| article.mark_read(is_read, now))
            .await
    }

    // Summaries

    pub fn prompt(&self, effort: Effort) -> String {
        system_prompt(effort)
    }

    pub async fn summarize_url(&self, url: &str, effort: Effort) -> Result<SummaryOutcome> {
        self.tldr.summarize_url(url, effort).await
    }

    pub async fn tldr_url(&self, date: NaiveDate, url: &str, effort: Effort) -> Result<Article> {
        self.tldr.tldr_url(date, url, effort).await
    }

    pub async fn sweep_stale_tldr(&self, date: NaiveDate) -> Result<usize> {
        self.tldr.sweep_stale(date).await
    }
}

fn require_url(url: &str) -> Result<String> {
    let canonical_url = canonicalize_url(url);
    if canonical_url.is_empty() {
        return Err(AppError::Validation("url is required".to_string()));
    }
    Ok(canonical_url)
}

fn blob_store(config: &Config) -> Option<BlobStore> {
    let blob = &config.blob;
    if blob.base_url.is_none() && blob.token.is_none() {
        warn!("Blob store not configured, using durable store only");
        return None;
    }
    if blob.base_url.is_none() {
        warn!("BLOB_BASE_URL not set, blob reads disabled");
    }
    if blob.token.is_none() {
        warn!("BLOB_READ_WRITE_TOKEN not set, blob writes disabled");
    }
    Some(BlobStore::new(
        blob.base_url.clone(),
        blob.api_url.clone(),
        blob.token.clone(),
    ))
}

fn edge_store(config: &Config) -> Option<EdgeStore> {
    let edge = &config.edge;
    let Some(config_id) = edge.config_id.clone() else {
        warn!("EDGE_CONFIG_ID not set, edge store disabled");
        return None;
    };

    let reader = match &edge.read_token {
        Some(token) => Some(EdgeReader::new(edge.read_url.clone(), config_id.clone(), token.clone())),
        None => {
            warn!("EDGE_CONFIG_READ_TOKEN not set, edge reads disabled");
            None
        }
    };
    let writer = match &edge.api_token {
        Some(token) => Some(EdgeWriter::new(
            edge.api_url.clone(),
            config_id,
            token.clone(),
            edge.team_id.clone(),
        )),
        None => {
            warn!("EDGE_CONFIG_API_TOKEN not set, edge writes disabled");
            None
        }
    };

    if reader.is_none() && writer.is_none() {
        return None;
    }
    Some(EdgeStore::new(reader, writer, edge.max_value_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    #[test]
    fn edge_store_needs_an_id_and_a_token() {
        let mut config = Config::default();
        assert!(edge_store(&config).is_none());

        config.edge.config_id = Some("ecfg_1".to_string());
        assert!(edge_store(&config).is_none());

        config.edge.read_token = Some("read".to_string());
        let edge = edge_store(&config).unwrap();
        assert!(edge.can_read());
        assert!(!edge.can_write());
    }

    #[test]
    fn blob_read_and_write_are_configured_separately() {
        let mut config = Config::default();
        assert!(blob_store(&config).is_none());

        config.blob.token = Some("rw".to_string());
        let blob = blob_store(&config).unwrap();
        assert!(blob.can_write());
        assert!(!blob.can_read());
    }

    #[tokio::test]
    async fn new_app_works_with_only_the_durable_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("test.db").to_string_lossy().to_string(),
            sources: vec![SourceConfig {
                id: "blog".to_string(),
                name: "Blog".to_string(),
                url: "http://127.0.0.1:9/feed".to_string(),
                category: None,
            }],
            ..Config::default()
        };
        let app = App::new(config).await.unwrap();

        assert_eq!(app.cache_mode().await.mode, CacheMode::ReadWrite);
        app.set_cache_mode(CacheMode::ReadOnly).await.unwrap();
        app.invalidate_cache_mode().await;
        assert_eq!(app.cache_mode().await.mode, CacheMode::ReadOnly);

        app.remove_url("https://a.com/x", None).await.unwrap();
        assert!(app.removed_urls().await.contains("a.com/x"));
    }
}
