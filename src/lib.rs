//! Per-date newsletter cache with sticky user state.
//!
//! Scraped articles are merged into durable per-date payloads without ever
//! overwriting what a user has done to them (read, removed, summarized).
//! Payloads, the raw day cache, the global removed-URL list and the cache
//! mode live behind a fallback chain of storage backends.

pub mod ai;
pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod freshness;
pub mod merge;
pub mod models;
pub mod scrape;
pub mod services;
pub mod storage;
pub mod urls;
