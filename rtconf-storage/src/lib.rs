//! rtconf Storage - Store Traits, Change Log and Local Cache
//!
//! Defines the seams to the source-of-truth store (key/value reads and
//! pub/sub), the change log sinks, and the per-process configuration cache
//! built on top of them.
//!
//! The read side lives in [`cache`]: [`ConfigService`] composes the local
//! cache, the circuit breaker, the store and the defaults table, and owns
//! the invalidation subscriber. The write side is [`ConfigWriter`].

pub mod cache;
pub mod change_log;
pub mod memory;
pub mod store;
pub mod write_path;

pub use cache::{
    Admission, Backoff, CacheMetrics, CacheMetricsSnapshot, CircuitBreaker, ConfigRead,
    ConfigService, ConfigServiceBuilder, FillTicket, LocalCache, ObserverChain, ReadOutcome,
    StoreObserver, SubscriberState, TracingObserver, ValueSource, DEFAULT_LOGS_COUNT,
    LOGS_COUNT_KEY,
};
pub use change_log::{ChangeLogSink, InMemoryChangeLog, JsonlChangeLog};
pub use memory::InMemoryConfigStore;
pub use store::{ConfigStore, Notification, NotificationBus, NotificationStream};
pub use write_path::{ConfigWriter, WriteReport};
