//! Core types for the distributed cache and lock service.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::TimedValue;

/// Cache and lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The lock was not acquired within the wait time
    #[error("Timed out after {waited_ms}ms waiting for lock '{name}'")]
    LockTimeout { name: String, waited_ms: u64 },

    /// The backing store failed
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Proof of lock ownership returned by a successful `try_lock`.
///
/// The sequence number is unique per grant, so a token from an expired
/// lease can never release a lock that has since been granted to someone
/// else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    name: String,
    sequence: u64,
}

impl LeaseToken {
    pub fn new(name: impl Into<String>, sequence: u64) -> Self {
        Self {
            name: name.into(),
            sequence,
        }
    }

    /// Name of the lock this token was granted for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Grant sequence number (fencing token).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.sequence)
    }
}

/// How long to wait for a lock and how long to hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTiming {
    /// Maximum time to wait for the lock. Zero means a single attempt.
    pub wait: Duration,
    /// Lease after which the lock frees itself.
    pub lease: Duration,
}

impl LockTiming {
    pub fn new(wait: Duration, lease: Duration) -> Self {
        Self { wait, lease }
    }

    /// Builds timing from configured magnitude-plus-unit values.
    pub fn from_config(wait: TimedValue, lease: TimedValue) -> Self {
        Self::new(wait.as_duration(), lease.as_duration())
    }
}
