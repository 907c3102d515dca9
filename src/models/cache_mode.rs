use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Global read/write gate for the scrape caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Disabled,
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl CacheMode {
    pub const ALL: [CacheMode; 4] = [
        CacheMode::Disabled,
        CacheMode::ReadOnly,
        CacheMode::WriteOnly,
        CacheMode::ReadWrite,
    ];

    pub fn can_read(&self) -> bool {
        matches!(self, CacheMode::ReadOnly | CacheMode::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, CacheMode::WriteOnly | CacheMode::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Disabled => "disabled",
            CacheMode::ReadOnly => "read_only",
            CacheMode::WriteOnly => "write_only",
            CacheMode::ReadWrite => "read_write",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "disabled" => Ok(CacheMode::Disabled),
            "read_only" => Ok(CacheMode::ReadOnly),
            "write_only" => Ok(CacheMode::WriteOnly),
            "read_write" => Ok(CacheMode::ReadWrite),
            _ => Err(AppError::Validation(format!("invalid cache mode: {}", s.trim()))),
        }
    }
}
