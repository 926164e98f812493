//! Fail-fast circuit breaker for source-of-truth store reads.
//!
//! Closed: reads go to the store. Any failed read opens the circuit. While
//! open, reads are rejected without touching the network until the retry
//! interval has elapsed since the last failure; then exactly one caller is
//! admitted as a probe. A successful probe closes the circuit, a failed one
//! refreshes the failure time and keeps it open.
//!
//! A probe whose caller never reports back (for example because its future
//! was dropped) is given up on after another retry interval, so the circuit
//! cannot wedge half-open.

use rtconf_core::{CircuitSnapshot, CircuitState};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Decision for one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, read normally.
    Allowed,
    /// Circuit was open and the interval elapsed: this read is the probe.
    Probe,
    /// Circuit open: skip the store.
    Rejected { retry_in: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    last_failure: Option<Instant>,
    probe_started: Option<Instant>,
    consecutive_failures: u64,
}

/// Process-wide health tracker for the store connection.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    retry_interval: Duration,
}

impl CircuitBreaker {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                last_failure: None,
                probe_started: None,
                consecutive_failures: 0,
            }),
            retry_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Decide whether a read may go to the store.
    pub fn admit(&self) -> Admission {
        let now = Instant::now();
        let mut guard = self.lock();
        match guard.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = guard
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.retry_interval);
                if elapsed >= self.retry_interval {
                    guard.state = CircuitState::HalfOpen;
                    guard.probe_started = Some(now);
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_in: self.retry_interval - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                let abandoned = guard
                    .probe_started
                    .map(|at| now.saturating_duration_since(at) >= self.retry_interval)
                    .unwrap_or(true);
                if abandoned {
                    guard.probe_started = Some(now);
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                }
            }
        }
    }

    /// Record a healthy store response (a value, or a definite "absent").
    pub fn record_success(&self) {
        let mut guard = self.lock();
        let previous = guard.state;
        guard.state = CircuitState::Closed;
        guard.probe_started = None;
        guard.consecutive_failures = 0;
        drop(guard);

        if previous != CircuitState::Closed {
            tracing::info!(
                previous = previous.as_str(),
                "Store reachable again, circuit closed"
            );
        }
    }

    /// Record a failed store read.
    pub fn record_failure(&self) {
        let mut guard = self.lock();
        let previous = guard.state;
        guard.state = CircuitState::Open;
        guard.last_failure = Some(Instant::now());
        guard.probe_started = None;
        guard.consecutive_failures += 1;
        let failures = guard.consecutive_failures;
        drop(guard);

        tracing::warn!(
            previous = previous.as_str(),
            consecutive_failures = failures,
            retry_interval_ms = self.retry_interval.as_millis() as u64,
            "Store marked unavailable, circuit open"
        );
    }

    /// Force the circuit closed and forget past failures.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let guard = self.lock();
        CircuitSnapshot {
            state: guard.state,
            last_failure_at: guard.last_failure.map(Instant::into_std),
            consecutive_failures: guard.consecutive_failures,
            retry_interval: self.retry_interval,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
