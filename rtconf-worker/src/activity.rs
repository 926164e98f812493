//! Activity-processing job settings.
//!
//! The job itself is external. It only reads its retry policy through the
//! Config Read API, so an edit to `MAX_RETRIES` reaches every worker on its
//! next read after invalidation.

use rtconf_core::ConfigValue;
use rtconf_storage::ConfigService;
use std::time::Duration;

pub const MAX_RETRIES_KEY: &str = "MAX_RETRIES";
pub const RETRY_DELAY_KEY: &str = "RETRY_DELAY_SECS";
pub const PROCESSING_DELAY_KEY: &str = "PROCESSING_DELAY_SECS";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 30;
pub const DEFAULT_PROCESSING_DELAY_SECS: u64 = 5;

/// Retry policy of the activity-processing job, as currently configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityJobSettings {
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub retry_delay: Duration,
    /// Simulated processing time per activity.
    pub processing_delay: Duration,
}

impl Default for ActivityJobSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            processing_delay: Duration::from_secs(DEFAULT_PROCESSING_DELAY_SECS),
        }
    }
}

impl ActivityJobSettings {
    /// Read the current policy. Values that are missing or not
    /// non-negative integers fall back to the built-in defaults.
    pub async fn load(service: &ConfigService) -> Self {
        let max_retries = read_u64(service, MAX_RETRIES_KEY, DEFAULT_MAX_RETRIES as u64).await;
        let retry_delay = read_u64(service, RETRY_DELAY_KEY, DEFAULT_RETRY_DELAY_SECS).await;
        let processing_delay =
            read_u64(service, PROCESSING_DELAY_KEY, DEFAULT_PROCESSING_DELAY_SECS).await;

        Self {
            max_retries: u32::try_from(max_retries).unwrap_or(u32::MAX),
            retry_delay: Duration::from_secs(retry_delay),
            processing_delay: Duration::from_secs(processing_delay),
        }
    }

    /// Whether a job that already retried `attempt` times may retry again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before retry number `attempt` (zero-based): `retry_delay * 2^attempt`.
    ///
    /// `None` once the retry budget is spent.
    pub fn retry_countdown(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.retry_delay.saturating_mul(factor))
    }
}

async fn read_u64(service: &ConfigService, key: &str, default: u64) -> u64 {
    let read = service.get_or(key, default as i64).await;
    match read.value().and_then(ConfigValue::as_i64) {
        Some(n) if n >= 0 => n as u64,
        _ => {
            tracing::warn!(key, value = ?read.value(), default, "Invalid job setting, using default");
            default
        }
    }
}
