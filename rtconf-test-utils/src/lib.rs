//! rtconf Test Utilities
//!
//! Shared test infrastructure for the rtconf workspace:
//! - Store, bus and sink wrappers with call counting and fault injection
//! - Proptest generators for keys, values and change records
//! - Fixtures for the standard defaults table and fast settings
//! - Async polling helpers

pub use rtconf_core::{
    ChangeLogRecord, ConfigKey, ConfigValue, DefaultsTable, RealtimeSettings, StoreError,
    StoreResult,
};
pub use rtconf_storage::{
    ChangeLogSink, ConfigStore, InMemoryChangeLog, InMemoryConfigStore, NotificationBus,
    NotificationStream,
};

use async_trait::async_trait;
use rtconf_core::ChangeLogError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MOCK STORES
// ============================================================================

/// Wraps a store and counts every call. Can be switched to fail on demand.
///
/// The inner store is untouched while failing, so a failed call never
/// reaches it.
pub struct CountingStore {
    inner: Arc<dyn ConfigStore>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn ConfigStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Read calls seen, including failed ones.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::connection("injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for CountingStore {
    async fn read_value(&self, key: &ConfigKey) -> StoreResult<Option<ConfigValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.read_value(key).await
    }

    async fn write_value(&self, key: &ConfigKey, value: &ConfigValue) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.write_value(key, value).await
    }
}

/// A bus that fails every subscribe until `failures` attempts were made,
/// then delegates.
pub struct FlakyBus {
    inner: Arc<dyn NotificationBus>,
    remaining_failures: AtomicUsize,
    subscribe_attempts: AtomicUsize,
}

impl FlakyBus {
    pub fn new(inner: Arc<dyn NotificationBus>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            subscribe_attempts: AtomicUsize::new(0),
        }
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationBus for FlakyBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::connection("injected subscribe failure"));
        }
        self.inner.subscribe(channel).await
    }
}

/// A bus that subscribes normally but swallows every publish.
///
/// Publishes report zero receivers and are counted, so a test can see that
/// a change was announced without any cache being invalidated by it.
pub struct MutedBus {
    inner: Arc<dyn NotificationBus>,
    published: AtomicUsize,
}

impl MutedBus {
    pub fn new(inner: Arc<dyn NotificationBus>) -> Self {
        Self {
            inner,
            published: AtomicUsize::new(0),
        }
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationBus for MutedBus {
    async fn publish(&self, _channel: &str, _payload: &[u8]) -> StoreResult<usize> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream> {
        self.inner.subscribe(channel).await
    }
}

/// Change log that rejects every append.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingChangeLog;

#[async_trait]
impl ChangeLogSink for FailingChangeLog {
    async fn append(&self, _record: ChangeLogRecord) -> Result<(), ChangeLogError> {
        Err(ChangeLogError::Io {
            reason: "injected failure".to_string(),
        })
    }

    async fn list_recent(&self, _limit: usize) -> Result<Vec<ChangeLogRecord>, ChangeLogError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for rtconf types.

    use super::*;
    use proptest::prelude::*;

    /// Upper-case config key names such as `MAX_RETRIES`.
    pub fn arb_config_key() -> impl Strategy<Value = ConfigKey> {
        "[A-Z][A-Z0-9_]{0,15}".prop_map(ConfigKey::from)
    }

    /// Any scalar config value. Floats are finite.
    pub fn arb_config_value() -> impl Strategy<Value = ConfigValue> {
        prop_oneof![
            any::<bool>().prop_map(ConfigValue::Bool),
            any::<i64>().prop_map(ConfigValue::Int),
            (-1.0e9f64..1.0e9f64).prop_map(ConfigValue::Float),
            "[ -~]{0,24}".prop_map(ConfigValue::Str),
        ]
    }

    pub fn arb_change_record() -> impl Strategy<Value = ChangeLogRecord> {
        (
            arb_config_key(),
            proptest::option::of(arb_config_value()),
            arb_config_value(),
        )
            .prop_map(|(key, old, new)| ChangeLogRecord::new(key, old, new))
    }

    /// Sequence of cache operations for coherence properties.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        Read(ConfigKey),
        Write(ConfigKey, ConfigValue),
        Invalidate(ConfigKey),
    }

    /// Operations over a small key space so keys collide.
    pub fn arb_cache_ops(max_len: usize) -> impl Strategy<Value = Vec<CacheOp>> {
        let key = prop_oneof![Just("A"), Just("B"), Just("C")].prop_map(ConfigKey::from);
        let op = prop_oneof![
            key.clone().prop_map(CacheOp::Read),
            (key.clone(), any::<i64>().prop_map(ConfigValue::Int))
                .prop_map(|(k, v)| CacheOp::Write(k, v)),
            key.prop_map(CacheOp::Invalidate),
        ];
        proptest::collection::vec(op, 0..max_len)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test data.

    use super::*;

    /// Defaults for every key the hosting application reads.
    pub fn sample_defaults() -> DefaultsTable {
        DefaultsTable::builder()
            .entry("SITE_NAME", "", "Site title shown in the header")
            .entry("THEME_COLOR", "#ffffff", "Primary theme color")
            .entry("WELCOME_MESSAGE", "", "Greeting on the landing page")
            .entry("MAINTENANCE_MODE", false, "Serve the maintenance page")
            .entry("ITEMS_PER_PAGE", 10, "Page size for listings")
            .entry("SHOW_LOGS", false, "Show the change log panel")
            .entry("UI_POLLING_INTERVAL", 300.0, "UI refresh period in seconds")
            .entry("LOGS_COUNT", 10, "Change log records to list")
            .entry("MAX_RETRIES", 3, "Activity job retries")
            .build()
            .expect("sample defaults are well-formed")
    }

    /// Settings with short intervals for fast tests.
    pub fn fast_settings() -> RealtimeSettings {
        RealtimeSettings::default()
            .with_retry_interval(Duration::from_millis(200))
            .with_socket_timeout(Duration::from_millis(100))
            .with_subscriber_initial_backoff(Duration::from_millis(10))
    }

    /// One in-memory store shared by every simulated process.
    pub fn shared_store() -> Arc<InMemoryConfigStore> {
        Arc::new(InMemoryConfigStore::new())
    }
}

// ============================================================================
// ASYNC HELPERS
// ============================================================================

/// Poll `check` every 10ms until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
