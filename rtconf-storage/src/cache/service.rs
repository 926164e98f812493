//! Config Read API.
//!
//! [`ConfigService`] is the one object a process builds at startup and shares
//! with every request handler and job. It composes the local cache, the
//! circuit breaker, the source-of-truth store and the defaults table, and
//! owns the invalidation subscriber.
//!
//! Resolution order for `get(key, fallback)`:
//!
//! 1. local cache hit
//! 2. store read, if the circuit admits it (bounded by the socket timeout)
//! 3. the caller's fallback
//! 4. the preloaded default
//! 5. [`ValueSource::Unavailable`]
//!
//! `get` never returns an error and never panics on store faults.

use rtconf_core::{
    ChangeLogRecord, CircuitSnapshot, CircuitState, ConfigError, ConfigKey, ConfigValue,
    DefaultsTable, HealthCheck, RealtimeSettings, RtconfResult, StoreError,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::breaker::{Admission, CircuitBreaker};
use super::local::LocalCache;
use super::observer::{
    CacheMetrics, CacheMetricsSnapshot, ObserverChain, ReadOutcome, StoreObserver,
    TracingObserver,
};
use super::read::{ConfigRead, ValueSource};
use super::subscriber::{Backoff, SubscriberHandle, SubscriberState, SubscriberTask};
use crate::change_log::ChangeLogSink;
use crate::store::{ConfigStore, NotificationBus};

/// Key holding the number of change-log records to list.
pub const LOGS_COUNT_KEY: &str = "LOGS_COUNT";

/// Record limit when `LOGS_COUNT` is missing, non-numeric or not positive.
pub const DEFAULT_LOGS_COUNT: usize = 10;

const HEALTH_COMPONENT: &str = "config_cache";

struct ServiceInner {
    settings: RealtimeSettings,
    cache: Arc<LocalCache>,
    breaker: CircuitBreaker,
    store: Arc<dyn ConfigStore>,
    bus: Arc<dyn NotificationBus>,
    defaults: Arc<DefaultsTable>,
    observers: Arc<ObserverChain>,
    metrics: Arc<CacheMetrics>,
    subscriber: Mutex<Option<SubscriberHandle>>,
    subscriber_state: Arc<watch::Sender<SubscriberState>>,
}

/// Process-wide configuration reader. Cheap to clone.
#[derive(Clone)]
pub struct ConfigService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService")
            .field("channel", &self.inner.settings.channel)
            .field("cached_keys", &self.inner.cache.len())
            .field("circuit", &self.inner.breaker.state())
            .field("subscriber", &*self.inner.subscriber_state.borrow())
            .finish()
    }
}

impl ConfigService {
    pub fn builder() -> ConfigServiceBuilder {
        ConfigServiceBuilder::default()
    }

    pub fn settings(&self) -> &RealtimeSettings {
        &self.inner.settings
    }

    pub fn defaults(&self) -> &DefaultsTable {
        &self.inner.defaults
    }

    /// The local cache. Exposed for inspection; readers should use `get`.
    pub fn cache(&self) -> &LocalCache {
        &self.inner.cache
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Resolve `key` with no caller fallback.
    pub async fn get(&self, key: impl Into<ConfigKey>) -> ConfigRead {
        self.get_with(key, None).await
    }

    /// Resolve `key`, using `fallback` if the store cannot supply a value.
    pub async fn get_or(
        &self,
        key: impl Into<ConfigKey>,
        fallback: impl Into<ConfigValue>,
    ) -> ConfigRead {
        self.get_with(key, Some(fallback.into())).await
    }

    /// Resolve `key` through cache, store and the fallback chain.
    pub async fn get_with(
        &self,
        key: impl Into<ConfigKey>,
        fallback: Option<ConfigValue>,
    ) -> ConfigRead {
        let key = key.into();
        let inner = &self.inner;

        let ticket = match inner.cache.lookup_for_fill(&key) {
            Ok(value) => {
                inner.observers.on_cache_hit(&key);
                return ConfigRead::new(value, ValueSource::Cache);
            }
            Err(ticket) => ticket,
        };
        inner.observers.on_cache_miss(&key);

        match inner.breaker.admit() {
            Admission::Rejected { retry_in } => {
                inner.observers.on_short_circuit(&key, retry_in);
            }
            Admission::Allowed | Admission::Probe => {
                let started = Instant::now();
                let result = self.read_store(&key).await;
                let elapsed = started.elapsed();

                match result {
                    Ok(Some(value)) => {
                        inner.breaker.record_success();
                        inner
                            .observers
                            .on_store_read(&key, &ReadOutcome::Found, elapsed);
                        if !inner.cache.fill(key.clone(), value.clone(), ticket) {
                            tracing::debug!(
                                key = %key,
                                "Invalidated during store read, value not cached"
                            );
                        }
                        return ConfigRead::new(value, ValueSource::Store);
                    }
                    Ok(None) => {
                        inner.breaker.record_success();
                        inner
                            .observers
                            .on_store_read(&key, &ReadOutcome::Absent, elapsed);
                    }
                    Err(e) => {
                        inner
                            .observers
                            .on_store_read(&key, &ReadOutcome::Failed(e), elapsed);
                        inner.breaker.record_failure();
                    }
                }
            }
        }

        self.fall_back(&key, fallback)
    }

    async fn read_store(&self, key: &ConfigKey) -> Result<Option<ConfigValue>, StoreError> {
        let timeout = self.inner.settings.socket_timeout;
        match tokio::time::timeout(timeout, self.inner.store.read_value(key)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { timeout }),
        }
    }

    fn fall_back(&self, key: &ConfigKey, fallback: Option<ConfigValue>) -> ConfigRead {
        let read = match fallback {
            Some(value) => ConfigRead::new(value, ValueSource::CallerDefault),
            None => match self.inner.defaults.get(key) {
                Some(value) => ConfigRead::new(value.clone(), ValueSource::PreloadedDefault),
                None => ConfigRead::unavailable(),
            },
        };
        self.inner.observers.on_fallback(key, read.source());
        read
    }

    /// Resolve every key of the defaults table, in declaration order.
    pub async fn snapshot(&self) -> Vec<(ConfigKey, ConfigRead)> {
        let keys: Vec<ConfigKey> = self.inner.defaults.keys().cloned().collect();
        let mut reads = Vec::with_capacity(keys.len());
        for key in keys {
            let read = self.get(key.clone()).await;
            reads.push((key, read));
        }
        reads
    }

    /// Most recent change-log records, newest first.
    ///
    /// The limit is read from `limit_key` through `get`; missing, non-numeric
    /// and non-positive limits fall back to [`DEFAULT_LOGS_COUNT`].
    pub async fn recent_changes(
        &self,
        sink: &dyn ChangeLogSink,
        limit_key: impl Into<ConfigKey>,
    ) -> RtconfResult<Vec<ChangeLogRecord>> {
        let read = self
            .get_or(limit_key, DEFAULT_LOGS_COUNT as i64)
            .await;
        let limit = read
            .value()
            .and_then(ConfigValue::as_i64)
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LOGS_COUNT);
        Ok(sink.list_recent(limit).await?)
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Evict `key` from the local cache. Returns whether an entry was removed.
    pub fn invalidate(&self, key: impl Into<ConfigKey>) -> bool {
        let key = key.into();
        evict(&self.inner.cache, &*self.inner.observers, &key)
    }

    /// Start the invalidation subscriber if it is not already running.
    ///
    /// Returns `true` if this call started it. A subscriber whose task has
    /// ended is replaced. Returns `false` outside a tokio runtime.
    pub fn start_subscriber(&self) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Cannot start invalidation subscriber outside a runtime");
                return false;
            }
        };

        let mut slot = self.subscriber_slot();
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return false;
            }
            tracing::warn!(
                channel = %self.inner.settings.channel,
                "Invalidation subscriber exited, restarting"
            );
        }

        let cache = Arc::clone(&self.inner.cache);
        let observers = Arc::clone(&self.inner.observers);
        let resync_cache = Arc::clone(&self.inner.cache);
        let resync_observers = Arc::clone(&self.inner.observers);
        let task = SubscriberTask {
            bus: Arc::clone(&self.inner.bus),
            channel: self.inner.settings.channel.clone(),
            subscribe_timeout: self.inner.settings.socket_timeout,
            backoff: Backoff::new(
                self.inner.settings.subscriber_initial_backoff,
                self.inner.settings.retry_interval,
            ),
            state: Arc::clone(&self.inner.subscriber_state),
            invalidate: move |key: &ConfigKey| {
                evict(&cache, &*observers, key);
            },
            resync: move || {
                let removed = resync_cache.clear();
                resync_observers.on_resync(removed);
            },
        };
        *slot = Some(task.spawn(&runtime));
        true
    }

    /// Signal the subscriber to stop and wait for it to exit.
    pub async fn stop_subscriber(&self) {
        let handle = self.subscriber_slot().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub fn subscriber_state(&self) -> SubscriberState {
        *self.inner.subscriber_state.borrow()
    }

    /// Wait until the subscriber reaches `state`. Returns `false` on timeout.
    pub async fn wait_for_subscriber(&self, state: SubscriberState, timeout: Duration) -> bool {
        let mut rx = self.inner.subscriber_state.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|current| *current == state))
            .await
            .is_ok_and(|changed| changed.is_ok());
        reached
    }

    fn subscriber_slot(&self) -> MutexGuard<'_, Option<SubscriberHandle>> {
        self.inner
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn circuit(&self) -> CircuitSnapshot {
        self.inner.breaker.snapshot()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Healthy when the circuit is closed and the subscriber is subscribed.
    pub fn health(&self) -> HealthCheck {
        let circuit = self.circuit();
        let subscriber = self.subscriber_state();

        let check = if circuit.state != CircuitState::Closed {
            HealthCheck::degraded(
                HEALTH_COMPONENT,
                format!(
                    "store circuit {} after {} consecutive failures",
                    circuit.state.as_str(),
                    circuit.consecutive_failures
                ),
            )
        } else if subscriber != SubscriberState::Subscribed {
            HealthCheck::degraded(
                HEALTH_COMPONENT,
                format!("invalidation subscriber {}", subscriber.as_str()),
            )
        } else {
            HealthCheck::healthy(HEALTH_COMPONENT)
        };

        check
            .with_metadata("circuit", serde_json::json!(circuit.state.as_str()))
            .with_metadata("subscriber", serde_json::json!(subscriber.as_str()))
            .with_metadata("cached_keys", serde_json::json!(self.inner.cache.len()))
    }
}

fn evict(cache: &LocalCache, observers: &dyn StoreObserver, key: &ConfigKey) -> bool {
    let removed = cache.evict(key).is_some();
    observers.on_invalidation(key, removed);
    removed
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`ConfigService`]. Store and bus are required.
#[derive(Default)]
pub struct ConfigServiceBuilder {
    settings: Option<RealtimeSettings>,
    store: Option<Arc<dyn ConfigStore>>,
    bus: Option<Arc<dyn NotificationBus>>,
    defaults: Option<Arc<DefaultsTable>>,
    observer: Option<Arc<dyn StoreObserver>>,
}

impl ConfigServiceBuilder {
    pub fn settings(mut self, settings: RealtimeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn defaults(mut self, defaults: impl Into<Arc<DefaultsTable>>) -> Self {
        self.defaults = Some(defaults.into());
        self
    }

    /// Extra observer, called after the built-in metrics and tracing observers.
    pub fn observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> RtconfResult<ConfigService> {
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let store = self.store.ok_or_else(|| ConfigError::MissingRequired {
            field: "store".to_string(),
        })?;
        let bus = self.bus.ok_or_else(|| ConfigError::MissingRequired {
            field: "bus".to_string(),
        })?;

        let metrics = Arc::new(CacheMetrics::new());
        let mut observers = ObserverChain::new();
        observers.add(metrics.clone());
        observers.add(Arc::new(TracingObserver));
        if let Some(observer) = self.observer {
            observers.add(observer);
        }

        let (state_tx, _) = watch::channel(SubscriberState::Idle);

        Ok(ConfigService {
            inner: Arc::new(ServiceInner {
                breaker: CircuitBreaker::new(settings.retry_interval),
                settings,
                cache: Arc::new(LocalCache::new()),
                store,
                bus,
                defaults: self.defaults.unwrap_or_default(),
                observers: Arc::new(observers),
                metrics,
                subscriber: Mutex::new(None),
                subscriber_state: Arc::new(state_tx),
            }),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
