//! Read side of the configuration cache.
//!
//! - `local` - the per-process key/value cache
//! - `breaker` - fail-fast circuit breaker for store reads
//! - `read` - `ConfigRead` result with value provenance
//! - `observer` - hooks for logging and metrics
//! - `subscriber` - invalidation subscriber task
//! - `service` - `ConfigService`, which ties it all together

mod breaker;
mod local;
mod observer;
mod read;
mod service;
mod subscriber;

pub use breaker::{Admission, CircuitBreaker};
pub use local::{FillTicket, LocalCache};
pub use observer::{
    CacheMetrics, CacheMetricsSnapshot, ObserverChain, ReadOutcome, StoreObserver,
    TracingObserver,
};
pub use read::{ConfigRead, ValueSource};
pub use service::{ConfigService, ConfigServiceBuilder, DEFAULT_LOGS_COUNT, LOGS_COUNT_KEY};
pub use subscriber::{Backoff, SubscriberState};
