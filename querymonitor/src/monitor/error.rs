//! Monitor error types.

use thiserror::Error;

use crate::cache::CacheError;
use crate::expiration::PolicyError;

/// Errors from the monitor scheduler and its sweeps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    /// Shared status or lock service failure
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The configured expiration thresholds are inconsistent
    #[error("Invalid expiration policy: {0}")]
    Policy(#[from] PolicyError),

    /// Shutdown interrupted a lock wait or a sweep
    #[error("Monitor interrupted")]
    Interrupted,

    /// The sweep outlived the monitor interval or its lock lease
    #[error("Sweep abandoned after outliving its interval or lock lease")]
    Abandoned,

    /// The sweep task panicked
    #[error("Sweep task panicked: {0}")]
    TaskPanicked(String),
}

impl MonitorError {
    /// True for the soft failures that simply end the current attempt.
    pub fn is_interruption(&self) -> bool {
        matches!(self, MonitorError::Interrupted | MonitorError::Abandoned)
    }
}
