//! Error types for rtconf operations

use crate::{ConfigKey, ConfigKind};
use std::time::Duration;
use thiserror::Error;

/// Faults talking to the source-of-truth store or its pub/sub facility.
///
/// "Key not found" is deliberately absent: a missing key is a normal empty
/// read (`Ok(None)`), never a fault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection to store failed: {reason}")]
    Connection { reason: String },

    #[error("Store operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Store protocol error: {reason}")]
    Protocol { reason: String },
}

impl StoreError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Settings and value-resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No value available for config {key}")]
    Unavailable { key: ConfigKey },
}

/// Errors building or loading a defaults table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefaultsError {
    #[error("Failed to read defaults file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse defaults: {reason}")]
    Parse { reason: String },

    #[error("Default for {key} does not match declared kind {declared}")]
    KindMismatch { key: ConfigKey, declared: ConfigKind },

    #[error("Duplicate default declared for {key}")]
    Duplicate { key: ConfigKey },
}

/// Change log sink errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeLogError {
    #[error("Change log I/O error: {reason}")]
    Io { reason: String },

    #[error("Change log record encoding error: {reason}")]
    Encoding { reason: String },
}

impl From<std::io::Error> for ChangeLogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ChangeLogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding {
            reason: e.to_string(),
        }
    }
}

/// Master error type for all rtconf errors.
#[derive(Debug, Clone, Error)]
pub enum RtconfError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Defaults error: {0}")]
    Defaults(#[from] DefaultsError),

    #[error("Change log error: {0}")]
    ChangeLog(#[from] ChangeLogError),
}

/// Result type alias for rtconf operations.
pub type RtconfResult<T> = Result<T, RtconfError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_transience() {
        assert!(StoreError::connection("refused").is_transient());
        assert!(StoreError::Timeout {
            timeout: Duration::from_secs(5)
        }
        .is_transient());
        assert!(!StoreError::protocol("bad frame").is_transient());
    }

    #[test]
    fn test_unavailable_display_names_key() {
        let err = ConfigError::Unavailable {
            key: ConfigKey::from("SITE_NAME"),
        };
        assert_eq!(err.to_string(), "No value available for config SITE_NAME");
    }

    #[test]
    fn test_master_error_from_conversions() {
        let err: RtconfError = StoreError::connection("down").into();
        assert!(matches!(err, RtconfError::Store(_)));
        assert!(err.to_string().contains("down"));

        let err: RtconfError = ChangeLogError::Io {
            reason: "disk full".to_string(),
        }
        .into();
        assert!(matches!(err, RtconfError::ChangeLog(_)));
    }

    #[test]
    fn test_change_log_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ChangeLogError::from(io);
        assert!(matches!(err, ChangeLogError::Io { .. }));
    }
}
