//! Process-wide settings for the configuration cache.
//!
//! Everything here is externally supplied (environment, or the hosting
//! application's own configuration) and only read by the cache.

use crate::error::{ConfigError, RtconfResult};
use std::path::PathBuf;
use std::time::Duration;

/// Default connection string when none is configured.
pub const DEFAULT_STORE_URL: &str = "memory://local";

/// Default pub/sub channel for invalidation notices.
pub const DEFAULT_CHANNEL: &str = "config_updates";

/// Default time an open circuit waits before allowing a probe (seconds).
pub const DEFAULT_RETRY_INTERVAL_SECS: f64 = 10.0;

/// Default bound on a single store read (seconds).
pub const DEFAULT_SOCKET_TIMEOUT_SECS: f64 = 5.0;

/// Default first reconnect delay for the subscriber (milliseconds).
pub const DEFAULT_SUBSCRIBER_INITIAL_BACKOFF_MS: u64 = 500;

/// Settings for the configuration cache of one process.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeSettings {
    /// Connection string for the source-of-truth store.
    pub store_url: String,
    /// Channel carrying invalidation notices.
    pub channel: String,
    /// How long an open circuit stays open, and the subscriber's backoff cap.
    pub retry_interval: Duration,
    /// Upper bound on a single store read.
    pub socket_timeout: Duration,
    /// First subscriber reconnect delay.
    pub subscriber_initial_backoff: Duration,
    /// Optional TOML file holding the defaults table.
    pub defaults_path: Option<PathBuf>,
    /// Optional JSON-lines file backing the change log.
    pub change_log_path: Option<PathBuf>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            retry_interval: Duration::from_secs_f64(DEFAULT_RETRY_INTERVAL_SECS),
            socket_timeout: Duration::from_secs_f64(DEFAULT_SOCKET_TIMEOUT_SECS),
            subscriber_initial_backoff: Duration::from_millis(
                DEFAULT_SUBSCRIBER_INITIAL_BACKOFF_MS,
            ),
            defaults_path: None,
            change_log_path: None,
        }
    }
}

impl RealtimeSettings {
    /// Create RealtimeSettings from environment variables.
    ///
    /// # Environment Variables
    /// - `RTCONF_STORE_URL`: Store connection string (default: memory://local)
    /// - `RTCONF_CHANNEL`: Invalidation channel (default: config_updates)
    /// - `RTCONF_RETRY_INTERVAL_SECS`: Open-circuit cooldown (default: 10.0)
    /// - `RTCONF_SOCKET_TIMEOUT_SECS`: Store read timeout (default: 5.0)
    /// - `RTCONF_SUBSCRIBER_INITIAL_BACKOFF_MS`: First reconnect delay (default: 500)
    /// - `RTCONF_DEFAULTS_PATH`: TOML defaults table (optional)
    /// - `RTCONF_CHANGE_LOG_PATH`: JSON-lines change log (optional)
    ///
    /// Unparseable numbers fall back to their defaults; call [`validate`]
    /// to reject out-of-range values.
    ///
    /// [`validate`]: RealtimeSettings::validate
    pub fn from_env() -> Self {
        let store_url =
            std::env::var("RTCONF_STORE_URL").unwrap_or_else(|_| DEFAULT_STORE_URL.to_string());

        let channel =
            std::env::var("RTCONF_CHANNEL").unwrap_or_else(|_| DEFAULT_CHANNEL.to_string());

        let retry_interval = env_secs_f64(
            "RTCONF_RETRY_INTERVAL_SECS",
            DEFAULT_RETRY_INTERVAL_SECS,
        );

        let socket_timeout = env_secs_f64(
            "RTCONF_SOCKET_TIMEOUT_SECS",
            DEFAULT_SOCKET_TIMEOUT_SECS,
        );

        let subscriber_initial_backoff = Duration::from_millis(
            std::env::var("RTCONF_SUBSCRIBER_INITIAL_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SUBSCRIBER_INITIAL_BACKOFF_MS),
        );

        let defaults_path = std::env::var_os("RTCONF_DEFAULTS_PATH").map(PathBuf::from);
        let change_log_path = std::env::var_os("RTCONF_CHANGE_LOG_PATH").map(PathBuf::from);

        Self {
            store_url,
            channel,
            retry_interval,
            socket_timeout,
            subscriber_initial_backoff,
            defaults_path,
            change_log_path,
        }
    }

    /// Validate the settings.
    ///
    /// Validates:
    /// - store_url and channel are non-empty
    /// - retry_interval, socket_timeout and subscriber_initial_backoff are positive
    pub fn validate(&self) -> RtconfResult<()> {
        if self.store_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "store_url".to_string(),
            }
            .into());
        }

        if self.channel.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "channel".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("retry_interval", self.retry_interval),
            ("socket_timeout", self.socket_timeout),
            ("subscriber_initial_backoff", self.subscriber_initial_backoff),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: format!("{} must be greater than 0", field),
                }
                .into());
            }
        }

        Ok(())
    }

    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = url.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_subscriber_initial_backoff(mut self, backoff: Duration) -> Self {
        self.subscriber_initial_backoff = backoff;
        self
    }

    pub fn with_defaults_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.defaults_path = Some(path.into());
        self
    }

    pub fn with_change_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.change_log_path = Some(path.into());
        self
    }
}

fn env_secs_f64(var: &str, default: f64) -> Duration {
    let secs = std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(default);
    Duration::from_secs_f64(secs)
}

// =============================================================================
// TESTS
// =============================================================================
