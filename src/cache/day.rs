use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::feed::SourceAdapter;
use crate::freshness::is_permanent_cache_eligible;
use crate::models::{CacheMode, DayScrape};
use crate::storage::{Durability, Storage, StorageKey};

/// Max adapters fetched at once for a single date.
const SOURCE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Network,
}

/// Per-source fetch report. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub source_id: String,
    pub articles: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DayFetch {
    pub scrape: DayScrape,
    pub provenance: Provenance,
    pub sources: Vec<SourceStats>,
}

/// Per-date cache of raw adapter output.
///
/// Gated only by the cache mode. Once a source's listing for a date has been
/// observed and stored it is served as-is; the rescrape rule does not apply
/// at this layer.
pub struct DayCache {
    storage: Storage,
    namespace: String,
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl DayCache {
    pub fn new(storage: Storage, namespace: &str, adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            storage,
            namespace: namespace.to_string(),
            adapters,
        }
    }

    fn key(&self, date: NaiveDate) -> StorageKey {
        StorageKey::day_scrape(&self.namespace, date)
    }

    pub async fn get_or_scrape(
        &self,
        date: NaiveDate,
        mode: CacheMode,
        excluded: &BTreeSet<String>,
    ) -> DayFetch {
        if mode.can_read() {
            if let Some(scrape) = self.storage.get_json::<DayScrape>(&self.key(date)).await {
                debug!("Day cache hit for {} ({} articles)", date, scrape.articles.len());
                return DayFetch {
                    scrape,
                    provenance: Provenance::Cache,
                    sources: Vec::new(),
                };
            }
        }

        let (scrape, sources) = self.scrape(date, excluded).await;

        if mode.can_write() {
            let durability = if is_permanent_cache_eligible(date, Utc::now().date_naive()) {
                Durability::Finalized
            } else {
                Durability::Mutable
            };
            if let Err(e) = self.storage.put_json(&self.key(date), &scrape, durability).await {
                warn!("Failed to store day cache for {}: {}", date, e);
            }
        }

        DayFetch {
            scrape,
            provenance: Provenance::Network,
            sources,
        }
    }

    /// Fetch every source for `date`. A failing source contributes nothing.
    async fn scrape(&self, date: NaiveDate, excluded: &BTreeSet<String>) -> (DayScrape, Vec<SourceStats>) {
        let fetches: Vec<_> = self
            .adapters
            .iter()
            .cloned()
            .map(move |adapter| {
                async move {
                    let started = Instant::now();
                    let result = adapter.scrape_date(date, excluded).await;
                    (adapter.id().to_string(), result, started.elapsed())
                }
                .boxed()
            })
            .collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffered(SOURCE_CONCURRENCY)
            .collect()
            .await;

        let mut scrape = DayScrape {
            date,
            articles: Vec::new(),
            issues: Vec::new(),
            cached_at: Utc::now(),
        };
        let mut seen = HashSet::new();
        let mut stats = Vec::with_capacity(results.len());

        for (source_id, result, elapsed) in results {
            let elapsed_ms = elapsed.as_millis() as u64;
            match result {
                Ok(source) => {
                    stats.push(SourceStats {
                        source_id,
                        articles: source.articles.len(),
                        elapsed_ms,
                        error: None,
                    });
                    for article in source.articles {
                        let article = article.with_default_state();
                        if seen.insert(article.canonical_url.clone()) {
                            scrape.articles.push(article);
                        }
                    }
                    scrape.issues.extend(source.issues);
                }
                Err(e) => {
                    warn!("Source {} failed for {}: {}", source_id, date, e);
                    stats.push(SourceStats {
                        source_id,
                        articles: 0,
                        elapsed_ms,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "Scraped {} articles from {} sources for {}",
            scrape.articles.len(),
            stats.len(),
            date
        );
        (scrape, stats)
    }

    pub async fn invalidate(&self, date: NaiveDate) -> Result<()> {
        self.storage.delete(&self.key(date)).await?;
        debug!("Invalidated day cache for {}", date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::feed::SourceScrape;
    use crate::models::Article;
    use crate::storage::{Backend, MemoryBackend, RetryConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAdapter {
        id: &'static str,
        urls: Vec<&'static str>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubAdapter {
        fn new(id: &'static str, urls: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                id,
                urls,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                urls: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn id(&self) -> &str {
            self.id
        }

        async fn scrape_date(&self, date: NaiveDate, _excluded: &BTreeSet<String>) -> Result<SourceScrape> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Other(anyhow::anyhow!("timeout")));
            }
            let mut articles = Vec::new();
            for url in &self.urls {
                let mut article = Article::new(*url, *url, date, self.id);
                // Adapters never set user state, but the cache must not trust that.
                article.removed = true;
                articles.push(article);
            }
            Ok(SourceScrape {
                source_id: self.id.to_string(),
                articles,
                issues: Vec::new(),
            })
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 23).unwrap()
    }

    fn day_cache(adapters: Vec<Arc<dyn SourceAdapter>>) -> (Arc<MemoryBackend>, DayCache) {
        let backend = Arc::new(MemoryBackend::new("blob"));
        let storage =
            Storage::new(vec![backend.clone() as Arc<dyn Backend>]).with_retry(RetryConfig::test());
        (backend, DayCache::new(storage, "tldr", adapters))
    }

    #[tokio::test]
    async fn miss_scrapes_and_stores_then_hit_skips_network() {
        let adapter = StubAdapter::new("a", vec!["https://a.com/1", "https://a.com/2"]);
        let (backend, cache) = day_cache(vec![adapter.clone() as Arc<dyn SourceAdapter>]);

        let first = cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        assert_eq!(first.provenance, Provenance::Network);
        assert_eq!(first.scrape.articles.len(), 2);
        assert!(backend.contains(&StorageKey::day_scrape("tldr", date())));

        let second = cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        assert_eq!(second.provenance, Provenance::Cache);
        assert_eq!(second.scrape.articles, first.scrape.articles);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn raw_output_carries_neutral_state() {
        let adapter = StubAdapter::new("a", vec!["https://a.com/1"]);
        let (_, cache) = day_cache(vec![adapter as Arc<dyn SourceAdapter>]);

        let fetch = cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        assert!(!fetch.scrape.articles[0].removed);
    }

    #[tokio::test]
    async fn failing_source_is_absorbed() {
        let good = StubAdapter::new("good", vec!["https://a.com/1"]);
        let bad = StubAdapter::failing("bad");
        let (_, cache) = day_cache(vec![bad as Arc<dyn SourceAdapter>, good]);

        let fetch = cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        assert_eq!(fetch.scrape.articles.len(), 1);
        assert_eq!(fetch.sources.len(), 2);
        assert!(fetch.sources[0].error.is_some());
    }

    #[tokio::test]
    async fn duplicates_across_sources_are_collapsed() {
        let a = StubAdapter::new("a", vec!["https://a.com/1"]);
        let b = StubAdapter::new("b", vec!["http://www.a.com/1/"]);
        let (_, cache) = day_cache(vec![a as Arc<dyn SourceAdapter>, b]);

        let fetch = cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        assert_eq!(fetch.scrape.articles.len(), 1);
        assert_eq!(fetch.scrape.articles[0].source_id, "a");
    }

    #[tokio::test]
    async fn mode_gates_reads_and_writes() {
        let adapter = StubAdapter::new("a", vec!["https://a.com/1"]);
        let (backend, cache) = day_cache(vec![adapter.clone() as Arc<dyn SourceAdapter>]);

        cache.get_or_scrape(date(), CacheMode::Disabled, &BTreeSet::new()).await;
        assert!(backend.is_empty());

        cache.get_or_scrape(date(), CacheMode::WriteOnly, &BTreeSet::new()).await;
        assert!(!backend.is_empty());

        // Write-only never serves from the cache it fills.
        let fetch = cache.get_or_scrape(date(), CacheMode::WriteOnly, &BTreeSet::new()).await;
        assert_eq!(fetch.provenance, Provenance::Network);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);

        let fetch = cache.get_or_scrape(date(), CacheMode::ReadOnly, &BTreeSet::new()).await;
        assert_eq!(fetch.provenance, Provenance::Cache);
    }

    #[tokio::test]
    async fn invalidate_forces_next_scrape() {
        let adapter = StubAdapter::new("a", vec!["https://a.com/1"]);
        let (_, cache) = day_cache(vec![adapter.clone() as Arc<dyn SourceAdapter>]);

        cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        cache.invalidate(date()).await.unwrap();
        let fetch = cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;

        assert_eq!(fetch.provenance, Provenance::Network);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_reports_a_secondary_that_kept_its_copy() {
        let adapter = StubAdapter::new("a", vec!["https://a.com/1"]);
        let blob = Arc::new(MemoryBackend::new("blob"));
        let durable = Arc::new(MemoryBackend::new("durable").with_capabilities(
            crate::storage::Capabilities {
                authoritative: true,
                ..Default::default()
            },
        ));
        let storage = Storage::new(vec![
            blob.clone() as Arc<dyn Backend>,
            durable.clone() as Arc<dyn Backend>,
        ])
        .with_retry(RetryConfig::test());
        let cache = DayCache::new(storage, "tldr", vec![adapter as Arc<dyn SourceAdapter>]);

        cache.get_or_scrape(date(), CacheMode::ReadWrite, &BTreeSet::new()).await;
        blob.fail_deletes(true);

        assert!(cache.invalidate(date()).await.is_err());
        assert!(!durable.contains(&StorageKey::day_scrape("tldr", date())));
    }
}
