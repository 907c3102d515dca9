//! Reconciling fresh scrape output with persisted user state.
//!
//! [`merge_articles`] is what gets persisted: a tombstone-free superset in
//! which an already-known article is never replaced by its fresh copy.
//! [`view`] is what gets shown: filtered, ordered and capped, and never
//! written back.

use std::collections::{BTreeSet, HashSet};

use crate::models::{Article, DailyPayload, DayScrape, Issue};

/// Merge `fresh` into `existing` by canonical URL.
///
/// Existing articles keep their position and every field, including stale
/// titles. Unknown fresh articles are appended with neutral state. Articles
/// missing from `fresh` are kept.
pub fn merge_articles(existing: Vec<Article>, fresh: Vec<Article>) -> Vec<Article> {
    let mut known: HashSet<String> = existing.iter().map(Article::identity).collect();
    let mut merged = existing;

    for article in fresh {
        let article = article.with_default_state();
        if known.insert(article.identity()) {
            merged.push(article);
        }
    }
    merged
}

fn merge_issues(existing: Vec<Issue>, fresh: Vec<Issue>) -> Vec<Issue> {
    let mut known: HashSet<(String, String)> = existing.iter().map(Issue::key).collect();
    let mut merged = existing;
    for issue in fresh {
        if known.insert(issue.key()) {
            merged.push(issue);
        }
    }
    merged
}

/// Payload to persist after scraping `scrape.date`. `cachedAt` is left for
/// the scrape-write path to stamp.
pub fn merge_payload(existing: Option<DailyPayload>, scrape: DayScrape) -> DailyPayload {
    let mut payload = existing.unwrap_or_else(|| DailyPayload::new(scrape.date));
    let articles = std::mem::take(&mut payload.articles);
    let issues = std::mem::take(&mut payload.issues);
    payload.articles = merge_articles(articles, scrape.articles);
    payload.issues = merge_issues(issues, scrape.issues);
    payload
}

fn display_rank(article: &Article) -> u8 {
    if article.removed {
        2
    } else if article.is_read() {
        1
    } else {
        0
    }
}

/// Read-time view of a payload: blocklisted URLs dropped, then unread, read
/// and removed articles in that order (stable within each group), then at
/// most `cap` articles.
pub fn view(payload: &DailyPayload, removed: &BTreeSet<String>, cap: Option<usize>) -> DailyPayload {
    let mut articles: Vec<Article> = payload
        .articles
        .iter()
        .filter(|a| !removed.contains(&a.identity()))
        .cloned()
        .collect();
    articles.sort_by_key(display_rank);
    if let Some(cap) = cap {
        articles.truncate(cap);
    }

    DailyPayload {
        date: payload.date,
        articles,
        issues: payload.issues.clone(),
        cached_at: payload.cached_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TldrState;
    use chrono::{NaiveDate, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 23).unwrap()
    }

    fn article(url: &str) -> Article {
        Article::new(url.to_uppercase(), url, date(), "src")
    }

    fn urls(articles: &[Article]) -> Vec<String> {
        articles.iter().map(Article::identity).collect()
    }

    #[test]
    fn existing_state_is_never_overwritten() {
        let mut x = article("a.com/x");
        x.removed = true;
        x.mark_read(true, Utc::now());
        x.tldr = TldrState::Available {
            markdown: "summary".to_string(),
            effort: Default::default(),
            checked_at: Utc::now(),
        };
        let expected = x.clone();

        let mut fresh_x = article("https://www.a.com/x/");
        fresh_x.title = "Retitled".to_string();

        let merged = merge_articles(vec![x], vec![fresh_x]);
        assert_eq!(merged, vec![expected]);
    }

    #[test]
    fn new_articles_never_inherit_state() {
        let mut x = article("a.com/x");
        x.removed = true;
        let mut z = article("a.com/z");
        z.removed = true;

        let merged = merge_articles(vec![x], vec![z]);
        assert!(merged[0].removed);
        assert!(!merged[1].removed);
        assert_eq!(merged[1].tldr, TldrState::Unknown);
    }

    #[test]
    fn articles_absent_from_fresh_are_kept() {
        let merged = merge_articles(
            vec![article("a.com/x"), article("a.com/y")],
            vec![article("a.com/z")],
        );
        assert_eq!(urls(&merged), vec!["a.com/x", "a.com/y", "a.com/z"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![article("a.com/x")];
        let fresh = vec![article("a.com/x"), article("a.com/y"), article("a.com/y/")];

        let once = merge_articles(existing, fresh.clone());
        let twice = merge_articles(once.clone(), fresh);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn merge_payload_keeps_cached_at_and_issues() {
        let mut existing = DailyPayload::new(date());
        existing.cached_at = Some(Utc::now());
        existing.issues.push(Issue {
            date: date(),
            source_id: "src".to_string(),
            category: "Tech".to_string(),
            title: "Old".to_string(),
            subtitle: None,
        });
        let scrape = DayScrape {
            date: date(),
            articles: vec![article("a.com/x")],
            issues: vec![
                Issue {
                    date: date(),
                    source_id: "src".to_string(),
                    category: "Tech".to_string(),
                    title: "New".to_string(),
                    subtitle: None,
                },
                Issue {
                    date: date(),
                    source_id: "src".to_string(),
                    category: "AI".to_string(),
                    title: "AI".to_string(),
                    subtitle: None,
                },
            ],
            cached_at: Utc::now(),
        };

        let merged = merge_payload(Some(existing.clone()), scrape);
        assert_eq!(merged.cached_at, existing.cached_at);
        assert_eq!(merged.issues.len(), 2);
        assert_eq!(merged.issues[0].title, "Old");
        assert_eq!(merged.articles.len(), 1);
    }

    #[test]
    fn view_orders_filters_and_caps_without_mutating() {
        let mut payload = DailyPayload::new(date());
        let mut removed = article("a.com/removed");
        removed.removed = true;
        let mut read = article("a.com/read");
        read.mark_read(true, Utc::now());
        payload.articles = vec![
            removed,
            read,
            article("a.com/unread1"),
            article("a.com/blocked"),
            article("a.com/unread2"),
        ];
        let original = payload.clone();
        let blocklist = BTreeSet::from(["a.com/blocked".to_string()]);

        let shown = view(&payload, &blocklist, None);
        assert_eq!(
            urls(&shown.articles),
            vec!["a.com/unread1", "a.com/unread2", "a.com/read", "a.com/removed"]
        );

        let capped = view(&payload, &blocklist, Some(3));
        assert_eq!(capped.articles.len(), 3);
        assert!(capped.articles.iter().all(|a| !a.removed));

        assert_eq!(payload, original);
    }
}
