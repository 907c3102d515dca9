use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use feed_rs::parser;
use reqwest::Client;

use super::{SourceAdapter, SourceScrape};
use crate::config::SourceConfig;
use crate::error::Result;
use crate::models::{Article, Issue};
use crate::urls::canonicalize_url;

/// Generic RSS/Atom adapter: keeps the entries published on the requested
/// UTC date.
pub struct FeedAdapter {
    client: Client,
    source: SourceConfig,
    newsletter_type: String,
}

impl FeedAdapter {
    pub fn new(source: SourceConfig, newsletter_type: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newsletter-cache/1.0")
            .build()
            .unwrap_or_default();

        Self {
            client,
            source,
            newsletter_type: newsletter_type.to_string(),
        }
    }

    async fn fetch_bytes(&self) -> Result<Vec<u8>> {
        let response = self.client.get(&self.source.url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to fetch {}: HTTP {}",
                self.source.url,
                response.status()
            )
            .into());
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Pick the entries for `date` out of a parsed feed.
    fn parse_entries(
        &self,
        bytes: &[u8],
        date: NaiveDate,
        excluded: &BTreeSet<String>,
    ) -> Result<SourceScrape> {
        let feed = parser::parse(bytes)?;
        let category = self
            .source
            .category
            .clone()
            .unwrap_or_else(|| self.source.name.clone());

        let articles: Vec<Article> = feed
            .entries
            .into_iter()
            .filter(|entry| {
                entry
                    .published
                    .or(entry.updated)
                    .is_some_and(|dt| dt.date_naive() == date)
            })
            .filter_map(|entry| {
                let url = entry.links.first().map(|l| l.href.clone())?;
                if excluded.contains(&canonicalize_url(&url)) {
                    return None;
                }

                let title = entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string());

                let mut article = Article::new(title, url, date, self.source.id.clone())
                    .with_category(category.clone());
                article.newsletter_type = self.newsletter_type.clone();
                article.article_meta = entry
                    .authors
                    .first()
                    .map(|a| a.name.clone())
                    .unwrap_or_default();
                Some(article)
            })
            .collect();

        let issues = if articles.is_empty() {
            Vec::new()
        } else {
            vec![Issue {
                date,
                source_id: self.source.id.clone(),
                category,
                title: feed
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| self.source.name.clone()),
                subtitle: feed.description.map(|d| d.content),
            }]
        };

        Ok(SourceScrape {
            source_id: self.source.id.clone(),
            articles,
            issues,
        })
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn id(&self) -> &str {
        &self.source.id
    }

    async fn scrape_date(&self, date: NaiveDate, excluded: &BTreeSet<String>) -> Result<SourceScrape> {
        let bytes = self.fetch_bytes().await?;
        let scrape = self.parse_entries(&bytes, date, excluded)?;
        tracing::debug!(
            "Fetched {} articles from {} for {}",
            scrape.articles.len(),
            self.source.id,
            date
        );
        Ok(scrape)
    }
}
