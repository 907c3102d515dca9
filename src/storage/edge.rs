use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::{Backend, Capabilities, StorageError, StorageKey};

const BACKEND: &str = "edge";

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .user_agent("newsletter-cache/1.0")
        .build()
        .unwrap_or_default()
}

/// Read side: the CDN-replicated item endpoint with a read token.
pub struct EdgeReader {
    client: Client,
    read_url: String,
    config_id: String,
    token: String,
}

impl EdgeReader {
    pub fn new(read_url: String, config_id: String, token: String) -> Self {
        Self {
            client: http_client(Duration::from_secs(5)),
            read_url: read_url.trim_end_matches('/').to_string(),
            config_id,
            token,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let url = format!(
            "{}/{}/item/{}",
            self.read_url,
            self.config_id,
            urlencoding::encode(key)
        );
        let response = self
            .client
            .get(&url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                // Items are JSON values; payloads are stored as JSON strings.
                let value: serde_json::Value = response.json().await?;
                Ok(match value {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StorageError::Status {
                backend: BACKEND,
                status: status.as_u16(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ItemOperation<'a> {
    operation: &'static str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PatchItems<'a> {
    items: Vec<ItemOperation<'a>>,
}

/// Write side: the control-plane API with a management token, taking
/// batched upsert/delete operations.
pub struct EdgeWriter {
    client: Client,
    api_url: String,
    config_id: String,
    token: String,
    team_id: Option<String>,
}

impl EdgeWriter {
    pub fn new(api_url: String, config_id: String, token: String, team_id: Option<String>) -> Self {
        Self {
            client: http_client(Duration::from_secs(10)),
            api_url: api_url.trim_end_matches('/').to_string(),
            config_id,
            token,
            team_id,
        }
    }

    /// Upsert several items in one control-plane call.
    pub async fn upsert_many(&self, items: &[(String, String)]) -> Result<(), StorageError> {
        let ops = items
            .iter()
            .map(|(key, value)| ItemOperation {
                operation: "upsert",
                key: key.as_str(),
                value: Some(value.as_str()),
            })
            .collect();
        self.patch(ops).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.patch(vec![ItemOperation {
            operation: "delete",
            key,
            value: None,
        }])
        .await
    }

    async fn patch(&self, items: Vec<ItemOperation<'_>>) -> Result<(), StorageError> {
        let mut request = self
            .client
            .patch(format!("{}/v1/edge-config/{}/items", self.api_url, self.config_id))
            .bearer_auth(&self.token)
            .json(&PatchItems { items });
        if let Some(team_id) = &self.team_id {
            request = request.query(&[("teamId", team_id.as_str())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StorageError::Status {
                backend: BACKEND,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Low-latency key-value cache for per-date payloads.
///
/// The read and write halves are configured independently; either may be
/// missing, which disables only that direction.
pub struct EdgeStore {
    reader: Option<EdgeReader>,
    writer: Option<EdgeWriter>,
    max_value_bytes: usize,
}

impl EdgeStore {
    pub fn new(reader: Option<EdgeReader>, writer: Option<EdgeWriter>, max_value_bytes: usize) -> Self {
        Self {
            reader,
            writer,
            max_value_bytes,
        }
    }

    fn address(key: &StorageKey) -> Result<String, StorageError> {
        key.edge_key().ok_or_else(|| StorageError::Unsupported {
            backend: BACKEND,
            key: key.pathname(),
        })
    }
}

#[async_trait]
impl Backend for EdgeStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            finalized_only: true,
            max_value_bytes: Some(self.max_value_bytes),
            ..Capabilities::default()
        }
    }

    fn holds(&self, key: &StorageKey) -> bool {
        key.edge_key().is_some()
    }

    fn can_read(&self) -> bool {
        self.reader.is_some()
    }

    fn can_write(&self) -> bool {
        self.writer.is_some()
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError> {
        let reader = self
            .reader
            .as_ref()
            .ok_or(StorageError::NotConfigured("edge read token"))?;
        reader.get(&Self::address(key)?).await
    }

    async fn put(&self, key: &StorageKey, value: &str) -> Result<(), StorageError> {
        let writer = self
            .writer
            .as_ref()
            .ok_or(StorageError::NotConfigured("edge api token"))?;
        if value.len() > self.max_value_bytes {
            return Err(StorageError::TooLarge {
                backend: BACKEND,
                size: value.len(),
                limit: self.max_value_bytes,
            });
        }

        let address = Self::address(key)?;
        debug!("Upserting edge item {}", address);
        writer.upsert_many(&[(address, value.to_string())]).await
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let writer = self
            .writer
            .as_ref()
            .ok_or(StorageError::NotConfigured("edge api token"))?;
        writer.delete(&Self::address(key)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn payload_key() -> StorageKey {
        StorageKey::payload("tldr", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    }

    #[test]
    fn holds_only_dated_payload_keys() {
        let store = EdgeStore::new(None, None, 1024);
        assert!(store.holds(&payload_key()));
        assert!(!store.holds(&StorageKey::RemovedPointer));
        assert!(!store.holds(&StorageKey::CacheMode));
    }

    #[test]
    fn reader_and_writer_are_configured_separately() {
        let reader = EdgeReader::new(
            "https://edge.example".to_string(),
            "cfg".to_string(),
            "read".to_string(),
        );
        let store = EdgeStore::new(Some(reader), None, 1024);

        assert!(store.can_read());
        assert!(!store.can_write());
    }

    #[tokio::test]
    async fn oversized_write_is_rejected_before_network() {
        let writer = EdgeWriter::new(
            "https://api.invalid".to_string(),
            "cfg".to_string(),
            "token".to_string(),
            None,
        );
        let store = EdgeStore::new(None, Some(writer), 8);

        assert!(matches!(
            store.put(&payload_key(), "0123456789").await,
            Err(StorageError::TooLarge { .. })
        ));
    }

    #[test]
    fn patch_body_uses_upsert_operations() {
        let body = PatchItems {
            items: vec![ItemOperation {
                operation: "upsert",
                key: "2025-01-01-tldr",
                value: Some("{}"),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["items"][0]["operation"], "upsert");
        assert_eq!(json["items"][0]["key"], "2025-01-01-tldr");
    }
}
