use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How long a `Creating` marker holds before it is treated as abandoned.
pub const TLDR_LEASE_SECS: i64 = 600;

/// Summarization depth requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Minimal,
    #[default]
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Minimal => "minimal",
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Effort::Minimal => 300,
            Effort::Low => 1024,
            Effort::Medium => 2048,
            Effort::High => 4096,
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Effort::Minimal),
            "low" => Ok(Effort::Low),
            "medium" => Ok(Effort::Medium),
            "high" => Ok(Effort::High),
            other => Err(AppError::Validation(format!("unknown effort level: {}", other))),
        }
    }
}

/// Lifecycle of an article's TLDR.
///
/// `Creating` carries a lease. A request that dies mid-summary leaves the
/// marker behind, and [`TldrState::effective`] reports it as `Unknown` once
/// the lease runs out so the article can be summarized again.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TldrState {
    #[default]
    Unknown,
    Creating {
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Available {
        markdown: String,
        effort: Effort,
        checked_at: DateTime<Utc>,
    },
    Error {
        error_message: String,
        checked_at: DateTime<Utc>,
    },
}

impl TldrState {
    pub fn creating(now: DateTime<Utc>) -> Self {
        TldrState::Creating {
            started_at: now,
            expires_at: now + Duration::seconds(TLDR_LEASE_SECS),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            TldrState::Unknown => "unknown",
            TldrState::Creating { .. } => "creating",
            TldrState::Available { .. } => "available",
            TldrState::Error { .. } => "error",
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self, TldrState::Creating { expires_at, .. } if *expires_at <= now)
    }

    /// The state as it should be acted on at `now`.
    pub fn effective(&self, now: DateTime<Utc>) -> TldrState {
        if self.is_expired(now) {
            TldrState::Unknown
        } else {
            self.clone()
        }
    }

    /// Whether another request is actively producing this TLDR.
    pub fn in_progress(&self, now: DateTime<Utc>) -> bool {
        matches!(self, TldrState::Creating { .. }) && !self.is_expired(now)
    }
}
