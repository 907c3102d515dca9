use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::cache::{CacheModeController, DayCache, PayloadStore, Provenance, RemovedUrlStore, SourceStats};
use crate::error::{AppError, Result};
use crate::freshness::should_rescrape;
use crate::merge::{merge_payload, view};
use crate::models::{Article, CacheMode, DailyPayload};

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("invalid date {:?}, expected YYYY-MM-DD", raw)))
}

/// Reject inverted ranges and ranges longer than `max_days` dates.
pub fn validate_range(start: NaiveDate, end: NaiveDate, max_days: i64) -> Result<()> {
    if end < start {
        return Err(AppError::Validation(format!(
            "start date {} is after end date {}",
            start, end
        )));
    }
    let days = (end - start).num_days() + 1;
    if days > max_days {
        return Err(AppError::Validation(format!(
            "range of {} days exceeds the limit of {}",
            days, max_days
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeSource {
    /// Every date was served from stored payloads.
    Cache,
    /// At least one date went through the adapters or the day cache.
    Live,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeStats {
    pub dates: usize,
    pub cached_dates: usize,
    pub scraped_dates: usize,
    pub day_cache_hits: usize,
    pub total_articles: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutcome {
    pub source: ScrapeSource,
    pub cache_mode: CacheMode,
    /// Display views, newest date first.
    pub payloads: Vec<DailyPayload>,
    pub stats: ScrapeStats,
}

impl ScrapeOutcome {
    pub fn articles(&self) -> Vec<&Article> {
        self.payloads.iter().flat_map(|p| p.articles.iter()).collect()
    }
}

/// Range scrape orchestration.
///
/// If the mode allows reads and every date in range has a payload that is
/// fresh, the stored payloads are returned and no adapter is called.
/// Otherwise each missing or stale date is fetched (through the day cache),
/// merged into its durable payload and written back through the scrape
/// path. Dates that are already fresh are left alone. A failed write to the
/// durable store fails the whole request, since the merged result would
/// otherwise be reported but never kept.
pub struct Scraper {
    payloads: Arc<PayloadStore>,
    day_cache: Arc<DayCache>,
    removed: Arc<RemovedUrlStore>,
    mode: Arc<CacheModeController>,
    per_day_cap: Option<usize>,
    max_range_days: i64,
}

impl Scraper {
    pub fn new(
        payloads: Arc<PayloadStore>,
        day_cache: Arc<DayCache>,
        removed: Arc<RemovedUrlStore>,
        mode: Arc<CacheModeController>,
    ) -> Self {
        Self {
            payloads,
            day_cache,
            removed,
            mode,
            per_day_cap: None,
            max_range_days: 31,
        }
    }

    pub fn with_per_day_cap(mut self, cap: Option<usize>) -> Self {
        self.per_day_cap = cap;
        self
    }

    pub fn with_max_range_days(mut self, days: i64) -> Self {
        self.max_range_days = days;
        self
    }

    pub async fn scrape_range(&self, start: NaiveDate, end: NaiveDate) -> Result<ScrapeOutcome> {
        validate_range(start, end, self.max_range_days)?;

        let mode = self.mode.get().await;
        let removed = self.removed.urls().await;
        let mut existing = self.payloads.get_range(start, end).await;
        let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();

        let is_fresh = |payload: Option<&DailyPayload>, date: NaiveDate| {
            payload.is_some_and(|p| !should_rescrape(date, p.cached_at))
        };

        let mut stats = ScrapeStats {
            dates: dates.len(),
            ..ScrapeStats::default()
        };

        let all_fresh = dates.iter().all(|d| is_fresh(existing.get(d), *d));
        if mode.can_read() && all_fresh {
            debug!("All {} dates fresh, serving stored payloads", dates.len());
            stats.cached_dates = dates.len();
            return Ok(self.outcome(ScrapeSource::Cache, mode, existing, &removed, stats));
        }

        let mut results = BTreeMap::new();
        for date in dates {
            let stored = existing.remove(&date);
            if mode.can_read() && is_fresh(stored.as_ref(), date) {
                stats.cached_dates += 1;
                if let Some(payload) = stored {
                    results.insert(date, payload);
                }
                continue;
            }

            let fetch = self.day_cache.get_or_scrape(date, mode, &removed).await;
            if fetch.provenance == Provenance::Cache {
                stats.day_cache_hits += 1;
            }
            stats.scraped_dates += 1;
            stats.sources.extend(fetch.sources);

            // Merge into the durable copy; the range read may have come
            // from a cache.
            let base = match stored {
                Some(_) => self.payloads.get_authoritative(date).await.or(stored),
                None => None,
            };
            let merged = merge_payload(base, fetch.scrape);
            let merged = if mode.can_write() {
                self.payloads
                    .put_from_scrape(merged, Utc::now())
                    .await
                    .inspect_err(|e| error!("Failed to persist payload for {}: {}", date, e))?
            } else {
                merged
            };
            results.insert(date, merged);
        }

        let outcome = self.outcome(ScrapeSource::Live, mode, results, &removed, stats);
        info!(
            "Scraped {} of {} dates, {} articles",
            outcome.stats.scraped_dates, outcome.stats.dates, outcome.stats.total_articles
        );
        Ok(outcome)
    }

    fn outcome(
        &self,
        source: ScrapeSource,
        cache_mode: CacheMode,
        payloads: BTreeMap<NaiveDate, DailyPayload>,
        removed: &std::collections::BTreeSet<String>,
        mut stats: ScrapeStats,
    ) -> ScrapeOutcome {
        let payloads: Vec<DailyPayload> = payloads
            .values()
            .rev()
            .map(|p| view(p, removed, self.per_day_cap))
            .collect();
        stats.total_articles = payloads.iter().map(|p| p.articles.len()).sum();

        ScrapeOutcome {
            source,
            cache_mode,
            payloads,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Repository;
    use crate::feed::{SourceAdapter, SourceScrape};
    use crate::storage::{Backend, Capabilities, MemoryBackend, RetryConfig, Storage};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for CountingAdapter {
        fn id(&self) -> &str {
            "counting"
        }

        async fn scrape_date(&self, date: NaiveDate, _excluded: &BTreeSet<String>) -> Result<SourceScrape> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourceScrape {
                source_id: "counting".to_string(),
                articles: vec![Article::new("New", format!("https://a.com/{}", date), date, "counting")],
                issues: Vec::new(),
            })
        }
    }

    struct Fixture {
        adapter: Arc<CountingAdapter>,
        mode: Arc<CacheModeController>,
        payloads: Arc<PayloadStore>,
        scraper: Scraper,
    }

    async fn fixture() -> Fixture {
        let adapter = Arc::new(CountingAdapter {
            calls: AtomicUsize::new(0),
        });
        let blob = Arc::new(MemoryBackend::new("blob"));
        let repository = Arc::new(Repository::in_memory().await.unwrap());
        let storage = Storage::new(vec![
            blob as Arc<dyn Backend>,
            repository.clone() as Arc<dyn Backend>,
        ])
        .with_retry(RetryConfig::test());

        let payloads = Arc::new(PayloadStore::new(storage.clone(), repository, "tldr"));
        let day_cache = Arc::new(DayCache::new(
            storage.clone(),
            "tldr",
            vec![adapter.clone() as Arc<dyn SourceAdapter>],
        ));
        let removed = Arc::new(RemovedUrlStore::new(storage.clone()));
        let mode = Arc::new(CacheModeController::new(storage, None, None));
        let scraper = Scraper::new(payloads.clone(), day_cache, removed, mode.clone());

        Fixture {
            adapter,
            mode,
            payloads,
            scraper,
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn range_validation() {
        assert!(validate_range(day("2025-01-02"), day("2025-01-01"), 31).is_err());
        assert!(validate_range(day("2025-01-01"), day("2025-01-31"), 31).is_ok());
        assert!(validate_range(day("2025-01-01"), day("2025-02-01"), 31).is_err());
        assert!(parse_date("2025-13-01").unwrap_err().is_client_error());
        assert_eq!(parse_date(" 2025-01-23 ").unwrap(), day("2025-01-23"));
    }

    #[tokio::test]
    async fn fresh_range_is_served_without_adapter_calls() {
        let f = fixture().await;
        f.scraper.scrape_range(day("2025-01-22"), day("2025-01-23")).await.unwrap();
        assert_eq!(f.adapter.calls.load(Ordering::SeqCst), 2);

        let outcome = f.scraper.scrape_range(day("2025-01-22"), day("2025-01-23")).await.unwrap();
        assert_eq!(outcome.source, ScrapeSource::Cache);
        assert_eq!(outcome.payloads.len(), 2);
        assert_eq!(outcome.payloads[0].date, day("2025-01-23"));
        assert_eq!(f.adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_date_is_rescraped_and_fresh_one_is_not() {
        let f = fixture().await;
        let mut stale = DailyPayload::new(day("2025-01-22"));
        stale.articles.push(Article::new("Old", "https://old.com/1", day("2025-01-22"), "x"));
        // Cached before the Pacific-midnight boundary of the 22nd.
        f.payloads
            .put_from_scrape(stale, Utc.with_ymd_and_hms(2025, 1, 22, 20, 0, 0).unwrap())
            .await
            .unwrap();
        f.payloads
            .put_from_scrape(DailyPayload::new(day("2025-01-23")), Utc::now())
            .await
            .unwrap();

        let outcome = f.scraper.scrape_range(day("2025-01-22"), day("2025-01-23")).await.unwrap();

        assert_eq!(outcome.source, ScrapeSource::Live);
        assert_eq!(outcome.stats.scraped_dates, 1);
        assert_eq!(outcome.stats.cached_dates, 1);
        assert_eq!(f.adapter.calls.load(Ordering::SeqCst), 1);

        let refreshed = f.payloads.get(day("2025-01-22")).await.unwrap();
        assert_eq!(refreshed.articles.len(), 2);
        assert!(!should_rescrape(day("2025-01-22"), refreshed.cached_at));
    }

    #[tokio::test]
    async fn disabled_mode_scrapes_but_keeps_user_state() {
        let f = fixture().await;
        f.scraper.scrape_range(day("2025-01-23"), day("2025-01-23")).await.unwrap();
        f.payloads
            .update_article(day("2025-01-23"), "a.com/2025-01-23", |a| a.removed = true)
            .await
            .unwrap();
        f.mode.set(CacheMode::Disabled).await.unwrap();

        let outcome = f.scraper.scrape_range(day("2025-01-23"), day("2025-01-23")).await.unwrap();

        assert_eq!(outcome.source, ScrapeSource::Live);
        assert_eq!(f.adapter.calls.load(Ordering::SeqCst), 2);
        assert!(outcome.payloads[0].articles[0].removed);
    }

    #[tokio::test]
    async fn durable_write_failure_fails_the_scrape() {
        let adapter = Arc::new(CountingAdapter {
            calls: AtomicUsize::new(0),
        });
        let durable = Arc::new(MemoryBackend::new("durable").with_capabilities(Capabilities {
            authoritative: true,
            listing: true,
            ..Capabilities::default()
        }));
        let storage = Storage::new(vec![
            Arc::new(MemoryBackend::new("blob")) as Arc<dyn Backend>,
            durable.clone() as Arc<dyn Backend>,
        ])
        .with_retry(RetryConfig::test());
        let repository = Arc::new(Repository::in_memory().await.unwrap());
        let payloads = Arc::new(PayloadStore::new(storage.clone(), repository, "tldr"));
        let day_cache = Arc::new(DayCache::new(
            storage.clone(),
            "tldr",
            vec![adapter.clone() as Arc<dyn SourceAdapter>],
        ));
        let removed = Arc::new(RemovedUrlStore::new(storage.clone()));
        let mode = Arc::new(CacheModeController::new(storage, None, None));
        let scraper = Scraper::new(payloads.clone(), day_cache, removed, mode);

        durable.fail_writes(true);
        let err = scraper
            .scrape_range(day("2025-01-23"), day("2025-01-23"))
            .await
            .unwrap_err();

        assert!(!err.is_client_error());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert!(payloads.get(day("2025-01-23")).await.is_none());
    }

    #[tokio::test]
    async fn merge_reads_the_durable_copy_not_a_stale_cache() {
        let blob = Arc::new(MemoryBackend::new("blob"));
        let repository = Arc::new(Repository::in_memory().await.unwrap());
        let storage = Storage::new(vec![
            blob.clone() as Arc<dyn Backend>,
            repository.clone() as Arc<dyn Backend>,
        ])
        .with_retry(RetryConfig::test());
        let adapter = Arc::new(CountingAdapter {
            calls: AtomicUsize::new(0),
        });
        let payloads = Arc::new(PayloadStore::new(storage.clone(), repository, "tldr"));
        let day_cache = Arc::new(DayCache::new(
            storage.clone(),
            "tldr",
            vec![adapter.clone() as Arc<dyn SourceAdapter>],
        ));
        let removed = Arc::new(RemovedUrlStore::new(storage.clone()));
        let mode = Arc::new(CacheModeController::new(storage, None, None));
        let scraper = Scraper::new(payloads.clone(), day_cache, removed, mode);

        let date = day("2025-01-23");
        let mut stale = DailyPayload::new(date);
        stale.articles.push(Article::new("Old", "https://old.com/1", date, "x"));
        payloads
            .put_from_scrape(stale, Utc.with_ymd_and_hms(2025, 1, 22, 20, 0, 0).unwrap())
            .await
            .unwrap();

        // The blob keeps the pre-removal copy.
        blob.fail_writes(true);
        blob.fail_deletes(true);
        payloads.update_article(date, "old.com/1", |a| a.removed = true).await.unwrap();
        blob.fail_writes(false);
        blob.fail_deletes(false);

        scraper.scrape_range(date, date).await.unwrap();

        let stored = payloads.get_authoritative(date).await.unwrap();
        assert!(stored.find_article("old.com/1").unwrap().removed);
        assert_eq!(stored.articles.len(), 2);
    }

    #[tokio::test]
    async fn invalid_range_fails_before_any_work() {
        let f = fixture().await;
        let err = f
            .scraper
            .scrape_range(day("2025-01-23"), day("2025-01-01"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(f.adapter.calls.load(Ordering::SeqCst), 0);
    }
}
