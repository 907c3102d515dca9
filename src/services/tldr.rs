use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ContentSource;
use crate::ai::Summarize;
use crate::cache::PayloadStore;
use crate::error::{AppError, Result};
use crate::models::{Article, Effort, TldrState};
use crate::storage::{Durability, Storage, StorageKey};
use crate::urls::{canonicalize_url, url_to_pathname};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutcome {
    pub canonical_url: String,
    pub effort: Effort,
    pub markdown: String,
    pub cached: bool,
}

/// Per-URL summaries, cached in storage and tracked on articles.
pub struct TldrService {
    storage: Storage,
    payloads: Arc<PayloadStore>,
    content: Arc<dyn ContentSource>,
    summarizer: Option<Arc<dyn Summarize>>,
}

impl TldrService {
    pub fn new(
        storage: Storage,
        payloads: Arc<PayloadStore>,
        content: Arc<dyn ContentSource>,
        summarizer: Option<Arc<dyn Summarize>>,
    ) -> Self {
        Self {
            storage,
            payloads,
            content,
            summarizer,
        }
    }

    async fn article_text(&self, url: &str) -> Result<String> {
        let key = StorageKey::Content {
            pathname: url_to_pathname(url),
        };
        if let Some(text) = self.storage.get(&key).await {
            return Ok(text);
        }

        let text = self.content.fetch(url).await?;
        if let Err(e) = self.storage.put(&key, &text, Durability::Mutable).await {
            warn!("Failed to cache content for {}: {}", url, e);
        }
        Ok(text)
    }

    pub async fn summarize_url(&self, url: &str, effort: Effort) -> Result<SummaryOutcome> {
        let canonical_url = canonicalize_url(url);
        if canonical_url.is_empty() {
            return Err(AppError::Validation("url is required".to_string()));
        }

        let key = StorageKey::summary(&url_to_pathname(url), effort);
        if let Some(markdown) = self.storage.get(&key).await {
            debug!("Summary cache hit for {}", canonical_url);
            return Ok(SummaryOutcome {
                canonical_url,
                effort,
                markdown,
                cached: true,
            });
        }

        let summarizer = self
            .summarizer
            .as_ref()
            .ok_or_else(|| AppError::Config("no summarizer API key configured".to_string()))?;

        let text = self.article_text(url).await?;
        let markdown = summarizer.summarize(url, &text, effort).await?;

        if let Err(e) = self.storage.put(&key, &markdown, Durability::Mutable).await {
            warn!("Failed to cache summary for {}: {}", canonical_url, e);
        }
        info!("Summarized {} at {} effort", canonical_url, effort);

        Ok(SummaryOutcome {
            canonical_url,
            effort,
            markdown,
            cached: false,
        })
    }

    /// Summarize an article of `date` and record the result on it.
    ///
    /// The article is marked `Creating` for the duration. A failure is
    /// recorded as `Error` and also returned.
    pub async fn tldr_url(&self, date: NaiveDate, url: &str, effort: Effort) -> Result<Article> {
        let canonical_url = canonicalize_url(url);
        if canonical_url.is_empty() {
            return Err(AppError::Validation("url is required".to_string()));
        }

        let now = Utc::now();
        let mut busy = false;
        self.payloads
            .update_article(date, &canonical_url, |article| {
                if article.tldr.in_progress(now) {
                    busy = true;
                } else {
                    article.tldr = TldrState::creating(now);
                }
            })
            .await?;
        if busy {
            return Err(AppError::Validation(format!(
                "a TLDR for {} is already being generated",
                canonical_url
            )));
        }

        match self.summarize_url(url, effort).await {
            Ok(summary) => {
                self.payloads
                    .update_article(date, &canonical_url, |article| {
                        article.tldr = TldrState::Available {
                            markdown: summary.markdown,
                            effort,
                            checked_at: Utc::now(),
                        };
                    })
                    .await
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(record) = self
                    .payloads
                    .update_article(date, &canonical_url, |article| {
                        article.tldr = TldrState::Error {
                            error_message: message,
                            checked_at: Utc::now(),
                        };
                    })
                    .await
                {
                    warn!("Failed to record TLDR error for {}: {}", canonical_url, record);
                }
                Err(e)
            }
        }
    }

    /// Reset expired `Creating` markers on `date` to `Unknown`.
    pub async fn sweep_stale(&self, date: NaiveDate) -> Result<usize> {
        let Some(mut payload) = self.payloads.get_authoritative(date).await else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut swept = 0;
        for article in payload.articles.iter_mut().filter(|a| a.tldr.is_expired(now)) {
            article.tldr = TldrState::Unknown;
            swept += 1;
        }

        if swept > 0 {
            self.payloads.put_user_update(payload).await?;
            info!("Reset {} stale TLDR markers on {}", swept, date);
        }
        Ok(swept)
    }
}
