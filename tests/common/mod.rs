#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use newsletter_cache::app::{App, Components};
use newsletter_cache::config::Config;
use newsletter_cache::db::Repository;
use newsletter_cache::error::{AppError, Result};
use newsletter_cache::feed::{SourceAdapter, SourceScrape};
use newsletter_cache::models::{Article, Effort};
use newsletter_cache::services::ContentSource;
use newsletter_cache::storage::{Backend, MemoryBackend};
use newsletter_cache::ai::Summarize;

/// Adapter whose listing can be changed between scrapes.
pub struct ScriptedAdapter {
    urls: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            urls: Mutex::new(urls.iter().map(|u| u.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_urls(&self, urls: &[&str]) {
        *self.urls.lock().unwrap() = urls.iter().map(|u| u.to_string()).collect();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn scrape_date(&self, date: NaiveDate, _excluded: &BTreeSet<String>) -> Result<SourceScrape> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let articles = self
            .urls
            .lock()
            .unwrap()
            .iter()
            .map(|url| Article::new(format!("Title of {}", url), url.clone(), date, "scripted"))
            .collect();
        Ok(SourceScrape {
            source_id: "scripted".to_string(),
            articles,
            issues: Vec::new(),
        })
    }
}

pub struct EchoContent;

#[async_trait]
impl ContentSource for EchoContent {
    async fn fetch(&self, url: &str) -> Result<String> {
        Ok(format!("Content of {}", url))
    }
}

pub struct EchoSummarizer;

#[async_trait]
impl Summarize for EchoSummarizer {
    async fn summarize(&self, url: &str, _content: &str, effort: Effort) -> Result<String> {
        if url.contains("fail") {
            return Err(AppError::Summarizer("refused".to_string()));
        }
        Ok(format!("{} summary of {}", effort, url))
    }
}

pub struct TestApp {
    pub app: App,
    pub adapter: Arc<ScriptedAdapter>,
    pub blob: Arc<MemoryBackend>,
}

pub async fn test_app(urls: &[&str]) -> TestApp {
    let adapter = ScriptedAdapter::new(urls);
    let blob = Arc::new(MemoryBackend::new("blob"));
    let repository = Arc::new(Repository::in_memory().await.unwrap());

    let config = Config {
        db_path: ":memory:".to_string(),
        sources: Vec::new(),
        ..Config::default()
    };
    let components = Components {
        backends: vec![blob.clone() as Arc<dyn Backend>, repository.clone() as Arc<dyn Backend>],
        repository,
        adapters: vec![adapter.clone() as Arc<dyn SourceAdapter>],
        content: Arc::new(EchoContent),
        summarizer: Some(Arc::new(EchoSummarizer) as Arc<dyn Summarize>),
    };

    TestApp {
        app: App::with_components(config, components),
        adapter,
        blob,
    }
}
