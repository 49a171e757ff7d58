//! Query expiration thresholds.
//!
//! [`ExpirationPolicy`] is the immutable set of timeouts derived from the
//! `[expiration]` config section. It is rebuilt on every configuration
//! reload, never mutated.
//!
//! Three thresholds are derived from `call_timeout` unless configured
//! explicitly, always in `call_timeout`'s unit:
//!
//! | threshold | derivation |
//! |---|---|
//! | `short_circuit_check_time` | `call_timeout / 2`, at least 1 ms |
//! | `short_circuit_timeout` | `round(0.97 × call_timeout)` |
//! | `long_running_query_timeout` | `(max_retries + 1) × call_timeout` |
//!
//! # Example
//!
//! ```
//! use querymonitor::config::ExpirationSettings;
//! use querymonitor::expiration::ExpirationPolicy;
//!
//! let policy = ExpirationPolicy::from_settings(&ExpirationSettings::default()).unwrap();
//! assert_eq!(policy.idle_timeout_millis(), 15 * 60 * 1000);
//! assert_eq!(policy.short_circuit_timeout().magnitude, 58);
//! assert_eq!(policy.long_running_query_timeout().magnitude, 240);
//! ```

use thiserror::Error;
use tracing::warn;

use crate::config::{ExpirationSettings, TimeUnit, TimedValue, SHORT_CIRCUIT_TIMEOUT_FRACTION};

/// Errors from deriving an expiration policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A threshold has a zero magnitude.
    #[error("{name} must be greater than zero")]
    NonPositive { name: &'static str },

    /// The minimum page timeout exceeds the maximum.
    #[error("page_min_timeout ({min_ms}ms) exceeds page_max_timeout ({max_ms}ms)")]
    PageTimeoutRange { min_ms: u64, max_ms: u64 },
}

/// Immutable timeout thresholds for query expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    idle_timeout: TimedValue,
    progress_timeout: TimedValue,
    call_timeout: TimedValue,
    call_timeout_interval: TimedValue,
    page_min_timeout: TimedValue,
    page_max_timeout: TimedValue,
    short_circuit_check_time: TimedValue,
    short_circuit_timeout: TimedValue,
    long_running_query_timeout: TimedValue,
    max_long_running_timeout_retries: u32,
}

impl ExpirationPolicy {
    /// Builds a policy from configuration, deriving unset thresholds.
    pub fn from_settings(settings: &ExpirationSettings) -> Result<Self, PolicyError> {
        let call = settings.call_timeout;
        let retries = settings.max_long_running_timeout_retries;

        let policy = Self {
            idle_timeout: settings.idle_timeout,
            progress_timeout: settings.progress_timeout,
            call_timeout: call,
            call_timeout_interval: settings.call_timeout_interval,
            page_min_timeout: settings.page_min_timeout,
            page_max_timeout: settings.page_max_timeout,
            short_circuit_check_time: settings
                .short_circuit_check_time
                .unwrap_or_else(|| derive_half(call)),
            short_circuit_timeout: settings
                .short_circuit_timeout
                .unwrap_or_else(|| derive_short_circuit(call)),
            long_running_query_timeout: settings
                .long_running_query_timeout
                .unwrap_or_else(|| derive_long_running(call, retries)),
            max_long_running_timeout_retries: retries,
        };

        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if let Some((name, _)) = self.thresholds().into_iter().find(|(_, v)| v.is_zero()) {
            return Err(PolicyError::NonPositive { name });
        }

        let (min_ms, max_ms) = (
            self.page_min_timeout.as_millis(),
            self.page_max_timeout.as_millis(),
        );
        if min_ms > max_ms {
            return Err(PolicyError::PageTimeoutRange { min_ms, max_ms });
        }

        if self.short_circuit_timeout_millis() >= self.call_timeout_millis() {
            warn!(
                short_circuit_timeout_ms = self.short_circuit_timeout_millis(),
                call_timeout_ms = self.call_timeout_millis(),
                "short_circuit_timeout is not below call_timeout; pages will never short-circuit"
            );
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> TimedValue {
        self.idle_timeout
    }

    pub fn idle_timeout_millis(&self) -> u64 {
        self.idle_timeout.as_millis()
    }

    pub fn progress_timeout(&self) -> TimedValue {
        self.progress_timeout
    }

    pub fn progress_timeout_millis(&self) -> u64 {
        self.progress_timeout.as_millis()
    }

    pub fn call_timeout(&self) -> TimedValue {
        self.call_timeout
    }

    pub fn call_timeout_millis(&self) -> u64 {
        self.call_timeout.as_millis()
    }

    pub fn call_timeout_interval(&self) -> TimedValue {
        self.call_timeout_interval
    }

    pub fn call_timeout_interval_millis(&self) -> u64 {
        self.call_timeout_interval.as_millis()
    }

    pub fn page_min_timeout(&self) -> TimedValue {
        self.page_min_timeout
    }

    pub fn page_min_timeout_millis(&self) -> u64 {
        self.page_min_timeout.as_millis()
    }

    pub fn page_max_timeout(&self) -> TimedValue {
        self.page_max_timeout
    }

    pub fn page_max_timeout_millis(&self) -> u64 {
        self.page_max_timeout.as_millis()
    }

    pub fn short_circuit_check_time(&self) -> TimedValue {
        self.short_circuit_check_time
    }

    pub fn short_circuit_check_time_millis(&self) -> u64 {
        self.short_circuit_check_time.as_millis()
    }

    pub fn short_circuit_timeout(&self) -> TimedValue {
        self.short_circuit_timeout
    }

    pub fn short_circuit_timeout_millis(&self) -> u64 {
        self.short_circuit_timeout.as_millis()
    }

    pub fn long_running_query_timeout(&self) -> TimedValue {
        self.long_running_query_timeout
    }

    pub fn long_running_query_timeout_millis(&self) -> u64 {
        self.long_running_query_timeout.as_millis()
    }

    pub fn max_long_running_timeout_retries(&self) -> u32 {
        self.max_long_running_timeout_retries
    }

    /// Every threshold with its config key, in declaration order.
    pub fn thresholds(&self) -> [(&'static str, TimedValue); 9] {
        [
            ("idle_timeout", self.idle_timeout),
            ("progress_timeout", self.progress_timeout),
            ("call_timeout", self.call_timeout),
            ("call_timeout_interval", self.call_timeout_interval),
            ("page_min_timeout", self.page_min_timeout),
            ("page_max_timeout", self.page_max_timeout),
            ("short_circuit_check_time", self.short_circuit_check_time),
            ("short_circuit_timeout", self.short_circuit_timeout),
            ("long_running_query_timeout", self.long_running_query_timeout),
        ]
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        // Defaults are all non-zero and ordered, so derivation cannot fail.
        match Self::from_settings(&ExpirationSettings::default()) {
            Ok(policy) => policy,
            Err(e) => unreachable!("default expiration settings are invalid: {e}"),
        }
    }
}

/// Half the call timeout. An odd magnitude is halved in milliseconds so that
/// a one-minute call timeout yields 30 seconds rather than zero. Never below
/// 1 ms, so a valid call timeout always derives a valid check time.
fn derive_half(call: TimedValue) -> TimedValue {
    let half = if call.magnitude % 2 == 0 || call.unit == TimeUnit::Milliseconds {
        call.with_magnitude(call.magnitude / 2)
    } else {
        TimedValue::millis(call.as_millis() / 2)
    };
    if half.is_zero() && !call.is_zero() {
        TimedValue::millis(1)
    } else {
        half
    }
}

fn derive_short_circuit(call: TimedValue) -> TimedValue {
    call.with_magnitude((SHORT_CIRCUIT_TIMEOUT_FRACTION * call.magnitude as f64).round() as u64)
}

fn derive_long_running(call: TimedValue, retries: u32) -> TimedValue {
    call.with_magnitude(call.magnitude.saturating_mul(u64::from(retries) + 1))
}
