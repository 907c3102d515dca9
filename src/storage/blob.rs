use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{Backend, Capabilities, StorageError, StorageKey};

const BACKEND: &str = "blob";

#[derive(Debug, Deserialize)]
struct ListResponse {
    blobs: Vec<ListedBlob>,
}

#[derive(Debug, Deserialize)]
struct ListedBlob {
    pathname: String,
}

/// Object store addressed by deterministic pathnames.
///
/// Reads use the public store URL and need no credentials. Writes, deletes
/// and listing go through the API with the read-write token.
pub struct BlobStore {
    client: Client,
    read_base_url: Option<String>,
    api_url: String,
    token: Option<String>,
}

impl BlobStore {
    pub fn new(read_base_url: Option<String>, api_url: String, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("newsletter-cache/1.0")
            .build()
            .unwrap_or_default();

        Self {
            client,
            read_base_url: read_base_url.map(|u| u.trim_end_matches('/').to_string()),
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn public_url(&self, pathname: &str) -> Result<String, StorageError> {
        let base = self
            .read_base_url
            .as_deref()
            .ok_or(StorageError::NotConfigured("blob read URL"))?;
        Ok(format!("{}/{}", base, pathname))
    }

    fn token(&self) -> Result<&str, StorageError> {
        self.token
            .as_deref()
            .ok_or(StorageError::NotConfigured("blob write token"))
    }
}

#[async_trait]
impl Backend for BlobStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            listing: true,
            ..Capabilities::default()
        }
    }

    fn holds(&self, _key: &StorageKey) -> bool {
        true
    }

    fn can_read(&self) -> bool {
        self.read_base_url.is_some()
    }

    fn can_write(&self) -> bool {
        self.token.is_some()
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, StorageError> {
        let url = self.public_url(&key.pathname())?;
        let response = self
            .client
            .get(&url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.text().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StorageError::Status {
                backend: BACKEND,
                status: status.as_u16(),
            }),
        }
    }

    async fn put(&self, key: &StorageKey, value: &str) -> Result<(), StorageError> {
        let pathname = key.pathname();
        let content_type = if pathname.ends_with(".json") {
            "application/json"
        } else {
            "text/plain; charset=utf-8"
        };

        let response = self
            .client
            .put(format!("{}/{}", self.api_url, pathname))
            .bearer_auth(self.token()?)
            .header("x-add-random-suffix", "0")
            .header("x-allow-overwrite", "1")
            .header("x-content-type", content_type)
            .header("x-cache-control-max-age", "0")
            .body(value.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Status {
                backend: BACKEND,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let url = self.public_url(&key.pathname())?;
        let response = self
            .client
            .post(format!("{}/delete", self.api_url))
            .bearer_auth(self.token()?)
            .json(&serde_json::json!({ "urls": [url] }))
            .send()
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(StorageError::Status {
                backend: BACKEND,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let response = self
            .client
            .get(&self.api_url)
            .bearer_auth(self.token()?)
            .query(&[("prefix", prefix), ("limit", "1000")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Status {
                backend: BACKEND,
                status: response.status().as_u16(),
            });
        }

        let listed: ListResponse = response.json().await?;
        Ok(listed.blobs.into_iter().map(|b| b.pathname).collect())
    }
}
