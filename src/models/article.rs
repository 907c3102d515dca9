use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::TldrState;
use crate::urls::canonicalize_url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadState {
    pub is_read: bool,
    pub marked_at: Option<DateTime<Utc>>,
}

/// A single article as persisted in a day's payload.
///
/// `removed`, `read` and `tldr` are user state. Once set they survive every
/// later scrape; only whole-payload writes ever change them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub canonical_url: String,
    #[serde(default)]
    pub article_meta: String,
    #[serde(default)]
    pub category: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub newsletter_type: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub read: ReadState,
    #[serde(default)]
    pub tldr: TldrState,
}

impl Article {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        date: NaiveDate,
        source_id: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            canonical_url: canonicalize_url(&url),
            url,
            article_meta: String::new(),
            category: String::new(),
            date,
            newsletter_type: String::new(),
            source_id: source_id.into(),
            removed: false,
            read: ReadState::default(),
            tldr: TldrState::Unknown,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Identity key. Older payloads may lack `canonicalUrl`, so it is
    /// derived from the raw URL when absent.
    pub fn identity(&self) -> String {
        if self.canonical_url.is_empty() {
            canonicalize_url(&self.url)
        } else {
            self.canonical_url.clone()
        }
    }

    /// Fill in the derived canonical URL if missing.
    pub fn ensure_canonical(&mut self) {
        if self.canonical_url.is_empty() {
            self.canonical_url = canonicalize_url(&self.url);
        }
    }

    /// Reset user state to the neutral values a never-seen article gets.
    pub fn with_default_state(mut self) -> Self {
        self.removed = false;
        self.read = ReadState::default();
        self.tldr = TldrState::Unknown;
        self.ensure_canonical();
        self
    }

    pub fn is_read(&self) -> bool {
        self.read.is_read
    }

    pub fn mark_read(&mut self, is_read: bool, now: DateTime<Utc>) {
        self.read = ReadState {
            is_read,
            marked_at: Some(now),
        };
    }
}

/// Metadata about one publishing unit (a newsletter issue or section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub date: NaiveDate,
    pub source_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
}

impl Issue {
    /// Issues are unique per source and category within a day.
    pub fn key(&self) -> (String, String) {
        (self.source_id.clone(), self.category.clone())
    }
}
