//! rtconf Worker - Hosting-Process Plumbing
//!
//! What a web or job worker process needs around the configuration cache:
//! tracing setup, an idempotent per-process bootstrap, and the settings
//! reader of the activity-processing job.

pub mod activity;
pub mod bootstrap;
pub mod error;
pub mod telemetry;

pub use activity::ActivityJobSettings;
pub use bootstrap::{load_defaults, open_change_log, Backends, WorkerRuntime};
pub use error::{WorkerError, WorkerResult};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
