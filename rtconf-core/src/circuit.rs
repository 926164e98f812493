//! Circuit breaker state shared between the breaker and its observers.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Store reads are attempted normally
    Closed,
    /// Store reads are skipped until the retry interval elapses
    Open,
    /// The single probe read is in flight
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Whether reads are currently being short-circuited.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub last_failure_at: Option<Instant>,
    pub consecutive_failures: u64,
    pub retry_interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_lowercase() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
    }

    #[test]
    fn test_serde_matches_labels() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            let back: CircuitState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
        }
    }

    #[test]
    fn test_is_open() {
        assert!(!CircuitState::Closed.is_open());
        assert!(CircuitState::Open.is_open());
        assert!(CircuitState::HalfOpen.is_open());
    }
}
