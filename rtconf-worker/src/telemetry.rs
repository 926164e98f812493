//! Tracing initialization for hosting processes.
//!
//! `RUST_LOG` selects the filter; `RTCONF_LOG_FORMAT=json` switches to
//! structured JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{WorkerError, WorkerResult};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "rtconf=info,rtconf_storage=info,rtconf_worker=info,info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else is plain.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Plain
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Service name attached to the startup event.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: std::env::var("RTCONF_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
            service_name: std::env::var("RTCONF_SERVICE_NAME")
                .unwrap_or_else(|_| "rtconf-worker".to_string()),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> WorkerResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| WorkerError::Telemetry {
        reason: e.to_string(),
    })?;

    tracing::info!(
        service_name = %config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Plain);
        assert_eq!(LogFormat::parse(""), LogFormat::Plain);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            format: LogFormat::Plain,
            service_name: "test".to_string(),
        };
        // The first call may race with other tests; the second never succeeds.
        let _ = init_tracing(&config);
        assert!(matches!(
            init_tracing(&config),
            Err(WorkerError::Telemetry { .. })
        ));
    }
}
