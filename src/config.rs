use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::CacheMode;

const DEFAULT_BLOB_API_URL: &str = "https://blob.vercel-storage.com";
const DEFAULT_EDGE_READ_URL: &str = "https://edge-config.vercel.com";
const DEFAULT_EDGE_API_URL: &str = "https://api.vercel.com";
const DEFAULT_EDGE_MAX_VALUE_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Public read URL of the store; reads are disabled without it.
    pub base_url: Option<String>,
    #[serde(default = "default_blob_api_url")]
    pub api_url: String,
    /// Read-write token; writes are disabled without it.
    pub token: Option<String>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_url: default_blob_api_url(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub config_id: Option<String>,
    #[serde(default = "default_edge_read_url")]
    pub read_url: String,
    #[serde(default = "default_edge_api_url")]
    pub api_url: String,
    pub read_token: Option<String>,
    pub api_token: Option<String>,
    pub team_id: Option<String>,
    #[serde(default = "default_edge_max_value_bytes")]
    pub max_value_bytes: usize,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            config_id: None,
            read_url: default_edge_read_url(),
            api_url: default_edge_api_url(),
            read_token: None,
            api_token: None,
            team_id: None,
            max_value_bytes: default_edge_max_value_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Newsletter type used in every persisted key.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub force_cache_mode: Option<CacheMode>,

    #[serde(default = "default_mode_cache_ttl")]
    pub mode_cache_ttl_secs: u64,

    pub per_day_cap: Option<usize>,

    #[serde(default = "default_max_range_days")]
    pub max_range_days: i64,

    #[serde(default)]
    pub blob: BlobConfig,

    #[serde(default)]
    pub edge: EdgeConfig,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    pub claude_api_key: Option<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsletter-cache");
    data_dir.join("newsletter.db").to_string_lossy().to_string()
}

fn default_namespace() -> String {
    "tldr".to_string()
}

fn default_mode_cache_ttl() -> u64 {
    300
}

fn default_max_range_days() -> i64 {
    31
}

fn default_blob_api_url() -> String {
    DEFAULT_BLOB_API_URL.to_string()
}

fn default_edge_read_url() -> String {
    DEFAULT_EDGE_READ_URL.to_string()
}

fn default_edge_api_url() -> String {
    DEFAULT_EDGE_API_URL.to_string()
}

fn default_edge_max_value_bytes() -> usize {
    DEFAULT_EDGE_MAX_VALUE_BYTES
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            id: "tldr-tech".to_string(),
            name: "TLDR Tech".to_string(),
            url: "https://tldr.tech/api/rss/tech".to_string(),
            category: Some("Tech".to_string()),
        },
        SourceConfig {
            id: "tldr-ai".to_string(),
            name: "TLDR AI".to_string(),
            url: "https://tldr.tech/api/rss/ai".to_string(),
            category: Some("AI".to_string()),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            namespace: default_namespace(),
            force_cache_mode: None,
            mode_cache_ttl_secs: default_mode_cache_ttl(),
            per_day_cap: None,
            max_range_days: default_max_range_days(),
            blob: BlobConfig::default(),
            edge: EdgeConfig::default(),
            sources: default_sources(),
            claude_api_key: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location (created with
    /// defaults if missing), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(AppError::Config(format!("config file {:?} not found", path)));
                }
                Self::read(path)?
            }
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    Self::read(&config_path)?
                } else {
                    let config = Config::default();
                    config.save()?;
                    config
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay environment variables; empty values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(db_path) = var("NEWSLETTER_CACHE_DB") {
            self.db_path = db_path;
        }
        if let Some(mode) = var("FORCE_CACHE_MODE") {
            let mode = mode
                .parse()
                .map_err(|e| AppError::Config(format!("FORCE_CACHE_MODE: {}", e)))?;
            self.force_cache_mode = Some(mode);
        }
        if let Some(token) = var("BLOB_READ_WRITE_TOKEN") {
            self.blob.token = Some(token);
        }
        if let Some(base_url) = var("BLOB_BASE_URL") {
            self.blob.base_url = Some(base_url);
        }
        if let Some(id) = var("EDGE_CONFIG_ID") {
            self.edge.config_id = Some(id);
        }
        if let Some(token) = var("EDGE_CONFIG_READ_TOKEN") {
            self.edge.read_token = Some(token);
        }
        if let Some(token) = var("EDGE_CONFIG_API_TOKEN") {
            self.edge.api_token = Some(token);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.claude_api_key = Some(key);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsletter-cache")
            .join("config.toml")
    }
}
