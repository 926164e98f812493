//! Health reporting for the configuration cache.
//!
//! A process is healthy when its circuit is closed and its invalidation
//! subscriber is listening. Anything else is degraded, never fatal: reads
//! keep answering from cache and defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but degraded
    Degraded,
}

/// Health check result for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            metadata: None,
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert!(HealthCheck::healthy("config-cache").is_healthy());
        let degraded = HealthCheck::degraded("config-cache", "circuit open");
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert_eq!(degraded.message.as_deref(), Some("circuit open"));
        assert!(!degraded.is_healthy());
    }

    #[test]
    fn test_metadata_accumulates() {
        let check = HealthCheck::healthy("config-cache")
            .with_metadata("circuit", serde_json::json!("closed"))
            .with_metadata("cached_keys", serde_json::json!(4));
        let metadata = check.metadata.unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["cached_keys"], serde_json::json!(4));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
