//! Source adapters: the collaborators that turn a site or feed into raw
//! articles for one date.

mod fetcher;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Article, Issue};

pub use fetcher::FeedAdapter;

/// One source's raw output for a date.
#[derive(Debug, Clone, Default)]
pub struct SourceScrape {
    pub source_id: String,
    pub articles: Vec<Article>,
    pub issues: Vec<Issue>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Articles published on `date`. URLs whose canonical form is in
    /// `excluded` may be skipped.
    async fn scrape_date(&self, date: NaiveDate, excluded: &BTreeSet<String>) -> Result<SourceScrape>;
}
