use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;

use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const MIN_CONTENT_CHARS: usize = 200;

/// Source of readable article text.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Extract readable content from HTML using html2text
    fn extract_content(html: &str) -> Option<String> {
        let text = match html2text::from_read(html.as_bytes(), 100) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Failed to convert HTML to text: {}", e);
                return None;
            }
        };

        let cleaned: String = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if cleaned.len() > MIN_CONTENT_CHARS {
            Some(cleaned)
        } else {
            tracing::debug!("Extracted content too short ({} chars)", cleaned.len());
            None
        }
    }
}

#[async_trait]
impl ContentSource for ContentFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));

        let response = self.client.get(url).headers(headers).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch {}: HTTP {}", url, response.status()).into());
        }

        let html = response.text().await?;
        Self::extract_content(&html)
            .ok_or_else(|| AppError::Summarizer(format!("no readable content at {}", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_and_drops_blank_lines() {
        let body = "A sentence long enough to count as article content. ".repeat(10);
        let html = format!(
            "<html><body><h1>Title</h1>\n\n<p>{}</p>\n<p></p></body></html>",
            body
        );

        let text = ContentFetcher::extract_content(&html).unwrap();
        assert!(text.contains("Title"));
        assert!(!text.contains("\n\n"));
    }

    #[test]
    fn short_pages_have_no_content() {
        assert!(ContentFetcher::extract_content("<p>Too short</p>").is_none());
    }
}
