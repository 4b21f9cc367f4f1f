//! Bounded retry with exponential backoff.
//!
//! Used on the relay path only: a publish or TTL refresh that hits a transient
//! store/bus outage is retried a few times, then abandoned with a warning. The
//! connection itself is never torn down because of it.
//!
//! - [`RetryConfig`]: retry budget and backoff curve
//! - [`retry_with_backoff`]: async driver

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default maximum retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 50;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 1000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Pause before retry number `attempt + 1`.
    ///
    /// `base * 2^attempt`, capped at the max, then stretched by up to
    /// `jitter_factor` scaled by `random` in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay(&self, attempt: u32, random: f64) -> Duration {
        let capped = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(31))
            .min(self.max_delay_ms);
        let stretch = 1.0 + self.jitter_factor * random.clamp(0.0, 1.0);
        Duration::from_millis(((capped as f64) * stretch).round() as u64)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// `true` for transient failures.
    fn is_retryable(&self) -> bool;
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Returns the last error in the latter two cases.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = config.delay(attempt, rand::random::<f64>());
                attempt += 1;
                debug!(operation, attempt, ?delay, error = %err, "retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if attempt > 0 {
                    warn!(operation, attempts = attempt + 1, error = %err, "giving up");
                }
                return Err(err);
            }
        }
    }
}
