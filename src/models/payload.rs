use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Article, Issue};

/// Everything known about one date: the unfiltered article superset plus
/// issue metadata.
///
/// `cached_at` records the last scrape-originated write. User actions
/// rewrite the payload but must leave it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPayload {
    pub date: NaiveDate,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

impl DailyPayload {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            articles: Vec::new(),
            issues: Vec::new(),
            cached_at: None,
        }
    }

    pub fn find_article(&self, canonical_url: &str) -> Option<&Article> {
        self.articles
            .iter()
            .find(|a| a.identity() == canonical_url)
    }

    pub fn find_article_mut(&mut self, canonical_url: &str) -> Option<&mut Article> {
        self.articles
            .iter_mut()
            .find(|a| a.identity() == canonical_url)
    }
}

/// Raw scrape output for one date, before any user state is attached.
///
/// This is what the day-level cache stores. Fetch timing and provenance are
/// reported separately and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayScrape {
    pub date: NaiveDate,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    pub cached_at: DateTime<Utc>,
}
