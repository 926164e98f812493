//! Worker process errors.

use rtconf_core::RtconfError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to initialize telemetry: {reason}")]
    Telemetry { reason: String },

    #[error("Unsupported store URL {url}: {reason}")]
    UnsupportedStore { url: String, reason: String },

    #[error("Workers did not converge on {key} within {waited_ms}ms")]
    NotConverged { key: String, waited_ms: u64 },

    #[error(transparent)]
    Rtconf(#[from] RtconfError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
