//! Observer hooks on the read path.
//!
//! - `StoreObserver` - callbacks for hits, misses, store reads, short
//!   circuits, fallbacks, invalidations and resyncs
//! - `ObserverChain` - fan-out to any number of observers
//! - `TracingObserver` - debug-level structured logging
//! - `CacheMetrics` - lock-free counters with a serializable snapshot
//!
//! Hooks run synchronously inside `get`, so they must be cheap.

use rtconf_core::{ConfigKey, StoreError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::read::ValueSource;

/// Outcome of one source-of-truth read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found,
    Absent,
    Failed(StoreError),
}

impl ReadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::Absent => "absent",
            Self::Failed(_) => "failed",
        }
    }
}

/// Read-path callbacks. Every method defaults to a no-op.
pub trait StoreObserver: Send + Sync {
    fn on_cache_hit(&self, _key: &ConfigKey) {}

    fn on_cache_miss(&self, _key: &ConfigKey) {}

    fn on_store_read(&self, _key: &ConfigKey, _outcome: &ReadOutcome, _elapsed: Duration) {}

    /// The store was skipped because the circuit is open.
    fn on_short_circuit(&self, _key: &ConfigKey, _retry_in: Duration) {}

    fn on_fallback(&self, _key: &ConfigKey, _source: ValueSource) {}

    fn on_invalidation(&self, _key: &ConfigKey, _was_cached: bool) {}

    /// The whole cache was dropped because invalidations may have been missed.
    fn on_resync(&self, _removed: usize) {}
}

/// Fan-out over registered observers, in registration order.
#[derive(Default, Clone)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Arc<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverChain")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl StoreObserver for ObserverChain {
    fn on_cache_hit(&self, key: &ConfigKey) {
        self.observers.iter().for_each(|o| o.on_cache_hit(key));
    }

    fn on_cache_miss(&self, key: &ConfigKey) {
        self.observers.iter().for_each(|o| o.on_cache_miss(key));
    }

    fn on_store_read(&self, key: &ConfigKey, outcome: &ReadOutcome, elapsed: Duration) {
        self.observers
            .iter()
            .for_each(|o| o.on_store_read(key, outcome, elapsed));
    }

    fn on_short_circuit(&self, key: &ConfigKey, retry_in: Duration) {
        self.observers
            .iter()
            .for_each(|o| o.on_short_circuit(key, retry_in));
    }

    fn on_fallback(&self, key: &ConfigKey, source: ValueSource) {
        self.observers.iter().for_each(|o| o.on_fallback(key, source));
    }

    fn on_invalidation(&self, key: &ConfigKey, was_cached: bool) {
        self.observers
            .iter()
            .for_each(|o| o.on_invalidation(key, was_cached));
    }

    fn on_resync(&self, removed: usize) {
        self.observers.iter().for_each(|o| o.on_resync(removed));
    }
}

/// Logs read-path events: debug for hits and fetches, warn for faults and
/// fallbacks, error when no value is available at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StoreObserver for TracingObserver {
    fn on_cache_hit(&self, key: &ConfigKey) {
        tracing::debug!(key = %key, "Config cache hit");
    }

    fn on_cache_miss(&self, key: &ConfigKey) {
        tracing::debug!(key = %key, "Config cache miss");
    }

    fn on_store_read(&self, key: &ConfigKey, outcome: &ReadOutcome, elapsed: Duration) {
        match outcome {
            ReadOutcome::Failed(error) => tracing::warn!(
                key = %key,
                error = %error,
                transient = error.is_transient(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Config store read failed"
            ),
            other => tracing::debug!(
                key = %key,
                outcome = other.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Config store read"
            ),
        }
    }

    fn on_short_circuit(&self, key: &ConfigKey, retry_in: Duration) {
        tracing::debug!(
            key = %key,
            retry_in_ms = retry_in.as_millis() as u64,
            "Config store skipped, circuit open"
        );
    }

    fn on_fallback(&self, key: &ConfigKey, source: ValueSource) {
        if source == ValueSource::Unavailable {
            tracing::error!(key = %key, "No value available for config key");
        } else {
            tracing::warn!(key = %key, source = source.as_str(), "Config fallback used");
        }
    }

    fn on_invalidation(&self, key: &ConfigKey, was_cached: bool) {
        tracing::debug!(key = %key, was_cached, "Config cache entry invalidated");
    }

    fn on_resync(&self, removed: usize) {
        if removed > 0 {
            tracing::info!(removed, "Config cache cleared after resubscribe");
        }
    }
}

/// Read-path counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    store_reads: AtomicU64,
    store_failures: AtomicU64,
    short_circuits: AtomicU64,
    fallbacks: AtomicU64,
    unavailable: AtomicU64,
    invalidations: AtomicU64,
    invalidations_empty: AtomicU64,
    resyncs: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_reads: self.store_reads.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            invalidations_empty: self.invalidations_empty.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
        }
    }
}

impl StoreObserver for CacheMetrics {
    fn on_cache_hit(&self, _key: &ConfigKey) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cache_miss(&self, _key: &ConfigKey) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn on_store_read(&self, _key: &ConfigKey, outcome: &ReadOutcome, _elapsed: Duration) {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        if matches!(outcome, ReadOutcome::Failed(_)) {
            self.store_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_short_circuit(&self, _key: &ConfigKey, _retry_in: Duration) {
        self.short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fallback(&self, _key: &ConfigKey, source: ValueSource) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        if source == ValueSource::Unavailable {
            self.unavailable.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_invalidation(&self, _key: &ConfigKey, was_cached: bool) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if !was_cached {
            self.invalidations_empty.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_resync(&self, _removed: usize) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub store_reads: u64,
    pub store_failures: u64,
    pub short_circuits: u64,
    pub fallbacks: u64,
    pub unavailable: u64,
    pub invalidations: u64,
    /// Invalidations for keys that were not cached.
    pub invalidations_empty: u64,
    /// Full cache clears on (re)subscribe.
    pub resyncs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl StoreObserver for Recorder {
        fn on_cache_hit(&self, key: &ConfigKey) {
            self.events.lock().unwrap().push(format!("hit:{key}"));
        }

        fn on_fallback(&self, key: &ConfigKey, source: ValueSource) {
            self.events
                .lock()
                .unwrap()
                .push(format!("fallback:{key}:{}", source.as_str()));
        }
    }

    #[test]
    fn test_chain_dispatches_in_order() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut chain = ObserverChain::new();
        chain.add(first.clone());
        chain.add(second.clone());
        assert_eq!(chain.len(), 2);

        let key = ConfigKey::from("SITE_NAME");
        chain.on_cache_hit(&key);
        chain.on_fallback(&key, ValueSource::PreloadedDefault);
        // Not overridden by Recorder: default no-op.
        chain.on_cache_miss(&key);

        let expected = vec![
            "hit:SITE_NAME".to_string(),
            "fallback:SITE_NAME:preloaded_default".to_string(),
        ];
        assert_eq!(*first.events.lock().unwrap(), expected);
        assert_eq!(*second.events.lock().unwrap(), expected);
    }

    #[test]
    fn test_metrics_counts() {
        let metrics = CacheMetrics::new();
        let key = ConfigKey::from("A");
        metrics.on_cache_miss(&key);
        metrics.on_store_read(&key, &ReadOutcome::Found, Duration::ZERO);
        metrics.on_store_read(
            &key,
            &ReadOutcome::Failed(StoreError::connection("refused")),
            Duration::ZERO,
        );
        metrics.on_short_circuit(&key, Duration::from_secs(1));
        metrics.on_fallback(&key, ValueSource::CallerDefault);
        metrics.on_fallback(&key, ValueSource::Unavailable);
        metrics.on_cache_hit(&key);
        metrics.on_invalidation(&key, true);
        metrics.on_invalidation(&key, false);
        metrics.on_resync(0);

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.store_reads, 2);
        assert_eq!(snap.store_failures, 1);
        assert_eq!(snap.short_circuits, 1);
        assert_eq!(snap.fallbacks, 2);
        assert_eq!(snap.unavailable, 1);
        assert_eq!(snap.invalidations, 2);
        assert_eq!(snap.invalidations_empty, 1);
        assert_eq!(snap.resyncs, 1);
    }
}
