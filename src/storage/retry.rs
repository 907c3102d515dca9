//! Backoff for idempotent reads.
//!
//! Only reads go through here. Mutations are already read-then-write-then-
//! verify and are never retried automatically.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::StorageError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::read()
    }
}

impl RetryConfig {
    /// 3 attempts, 100ms doubling to at most 2s.
    pub fn read() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 3,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
            max_attempts: 3,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. Permanent errors (see [`StorageError::is_transient`]) return
/// immediately.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if !err.is_transient() || attempts >= config.max_attempts {
                    return Err(err);
                }

                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name, attempts, config.max_attempts, err, delay
                );
                sleep(delay).await;
                delay = delay.mul_f64(config.factor).min(config.max_delay);
            }
        }
    }
}
