use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::DailyPayload;
use crate::storage::{Backend, Capabilities, StorageError, StorageKey};

use super::schema::SCHEMA;

const CACHE_MODE_SETTING: &str = "cache_mode";

/// Durable relational store and source of truth for payloads and settings.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    /// Open (or create) the database, creating its directory if needed.
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Settings

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO settings (key, value) VALUES (?1, ?2)
                       ON CONFLICT(key) DO UPDATE SET
                           value = excluded.value,
                           updated_at = datetime('now')"#,
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Daily payload operations

    /// Payloads for `start..=end`, newest date first.
    pub async fn get_daily_payloads_range(
        &self,
        namespace: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyPayload>> {
        let namespace = namespace.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT date, payload FROM daily_payloads
                       WHERE namespace = ?1 AND date >= ?2 AND date <= ?3
                       ORDER BY date DESC"#,
                )?;
                let rows = stmt
                    .query_map(
                        params![namespace, start.to_string(), end.to_string()],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let payloads = rows
            .into_iter()
            .filter_map(|(date, raw)| match serde_json::from_str(&raw) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!("Skipping unreadable payload for {}: {}", date, e);
                    None
                }
            })
            .collect();
        Ok(payloads)
    }

    async fn get_payload_raw(&self, namespace: &str, date: NaiveDate) -> Result<Option<String>> {
        let namespace = namespace.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT payload FROM daily_payloads WHERE namespace = ?1 AND date = ?2",
                        params![namespace, date.to_string()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;
        Ok(raw)
    }

    /// Store a payload exactly as given; `cached_at` is mirrored into its
    /// own column and never derived here.
    async fn put_payload_raw(
        &self,
        namespace: &str,
        date: NaiveDate,
        raw: String,
        cached_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO daily_payloads (namespace, date, payload, cached_at)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(namespace, date) DO UPDATE SET
                           payload = excluded.payload,
                           cached_at = excluded.cached_at,
                           updated_at = datetime('now')"#,
                    params![
                        namespace,
                        date.to_string(),
                        raw,
                        cached_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Document operations

    pub async fn get_document(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM documents WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn put_document(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO documents (key, value) VALUES (?1, ?2)
                       ON CONFLICT(key) DO UPDATE SET
                           value = excluded.value,
                           updated_at = datetime('now')"#,
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_document(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_documents(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let keys = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key FROM documents WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![pattern], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }
}

fn db_error(err: crate::error::AppError) -> StorageError {
    StorageError::Database(err.to_string())
}

#[async_trait]
impl Backend for Repository {
    fn name(&self) -> &'static str {
        "durable"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            authoritative: true,
            listing: true,
            finalized_only: false,
            max_value_bytes: None,
        }
    }

    fn holds(&self, _key: &StorageKey) -> bool {
        true
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        true
    }

    async fn get(&self, key: &StorageKey) -> std::result::Result<Option<String>, StorageError> {
        match key {
            StorageKey::Payload { namespace, date } => {
                self.get_payload_raw(namespace, *date).await.map_err(db_error)
            }
            StorageKey::CacheMode => self.get_setting(CACHE_MODE_SETTING).await.map_err(db_error),
            other => self.get_document(&other.pathname()).await.map_err(db_error),
        }
    }

    async fn put(&self, key: &StorageKey, value: &str) -> std::result::Result<(), StorageError> {
        match key {
            StorageKey::Payload { namespace, date } => {
                let payload: DailyPayload = serde_json::from_str(value)?;
                self.put_payload_raw(namespace, *date, value.to_string(), payload.cached_at)
                    .await
                    .map_err(db_error)
            }
            StorageKey::CacheMode => self
                .set_setting(CACHE_MODE_SETTING, value)
                .await
                .map_err(db_error),
            other => self
                .put_document(&other.pathname(), value)
                .await
                .map_err(db_error),
        }
    }

    async fn delete(&self, key: &StorageKey) -> std::result::Result<(), StorageError> {
        match key {
            StorageKey::Payload { namespace, date } => {
                let (namespace, date) = (namespace.clone(), date.to_string());
                self.conn
                    .call(move |conn| {
                        conn.execute(
                            "DELETE FROM daily_payloads WHERE namespace = ?1 AND date = ?2",
                            params![namespace, date],
                        )?;
                        Ok(())
                    })
                    .await?;
                Ok(())
            }
            StorageKey::CacheMode => {
                self.conn
                    .call(|conn| {
                        conn.execute(
                            "DELETE FROM settings WHERE key = ?1",
                            params![CACHE_MODE_SETTING],
                        )?;
                        Ok(())
                    })
                    .await?;
                Ok(())
            }
            other => self.delete_document(&other.pathname()).await.map_err(db_error),
        }
    }

    async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StorageError> {
        self.list_documents(prefix).await.map_err(db_error)
    }
}
