//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants and the `ConfigFile::default()`
//! implementation.

use std::time::Duration;

use super::settings::*;
use super::units::TimedValue;

// =============================================================================
// Monitor defaults
// =============================================================================

/// Default scheduler cadence (30 seconds).
pub const DEFAULT_SCHEDULER_CADENCE: Duration = Duration::from_secs(30);

/// Default minimum time between fleet-wide sweeps.
pub const DEFAULT_MONITOR_INTERVAL: TimedValue = TimedValue::seconds(30);

/// Default wait for the fleet lock: fail fast.
pub const DEFAULT_MONITOR_LOCK_WAIT: TimedValue = TimedValue::millis(0);

/// Default lease on the fleet lock.
pub const DEFAULT_MONITOR_LOCK_LEASE: TimedValue = TimedValue::seconds(30);

/// Default retention for non-running queries (1 day).
pub const DEFAULT_INACTIVE_QUERY_TTL: TimedValue = TimedValue::days(1);

// =============================================================================
// Executor status defaults
// =============================================================================

/// Default wait for a pool status lock.
pub const DEFAULT_EXECUTOR_STATUS_LOCK_WAIT: TimedValue = TimedValue::seconds(30);

/// Default lease on a pool status lock.
pub const DEFAULT_EXECUTOR_STATUS_LOCK_LEASE: TimedValue = TimedValue::seconds(30);

/// Connection pool assumed when a query does not name one.
pub const DEFAULT_CONNECTION_POOL: &str = "default";

// =============================================================================
// Expiration defaults
// =============================================================================

pub const DEFAULT_IDLE_TIMEOUT: TimedValue = TimedValue::minutes(15);
pub const DEFAULT_PROGRESS_TIMEOUT: TimedValue = TimedValue::minutes(5);
pub const DEFAULT_CALL_TIMEOUT: TimedValue = TimedValue::minutes(60);
pub const DEFAULT_CALL_TIMEOUT_INTERVAL: TimedValue = TimedValue::minutes(1);
pub const DEFAULT_PAGE_MIN_TIMEOUT: TimedValue = TimedValue::minutes(1);
pub const DEFAULT_PAGE_MAX_TIMEOUT: TimedValue = TimedValue::minutes(60);

/// Retries granted to a long-running query before it is timed out.
pub const DEFAULT_MAX_LONG_RUNNING_TIMEOUT_RETRIES: u32 = 3;

/// Fraction of the call timeout after which a page is returned short.
pub const SHORT_CIRCUIT_TIMEOUT_FRACTION: f64 = 0.97;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "querymonitor.log";

impl Default for ExpirationSettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            progress_timeout: DEFAULT_PROGRESS_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            call_timeout_interval: DEFAULT_CALL_TIMEOUT_INTERVAL,
            page_min_timeout: DEFAULT_PAGE_MIN_TIMEOUT,
            page_max_timeout: DEFAULT_PAGE_MAX_TIMEOUT,
            short_circuit_check_time: None,
            short_circuit_timeout: None,
            long_running_query_timeout: None,
            max_long_running_timeout_retries: DEFAULT_MAX_LONG_RUNNING_TIMEOUT_RETRIES,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            scheduler_cadence: DEFAULT_SCHEDULER_CADENCE,
            interval: DEFAULT_MONITOR_INTERVAL,
            lock_wait: DEFAULT_MONITOR_LOCK_WAIT,
            lock_lease: DEFAULT_MONITOR_LOCK_LEASE,
            inactive_query_ttl: DEFAULT_INACTIVE_QUERY_TTL,
        }
    }
}

impl Default for ExecutorStatusSettings {
    fn default() -> Self {
        Self {
            lock_wait: DEFAULT_EXECUTOR_STATUS_LOCK_WAIT,
            lock_lease: DEFAULT_EXECUTOR_STATUS_LOCK_LEASE,
            default_connection_pool: DEFAULT_CONNECTION_POOL.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            monitor: MonitorSettings::default(),
            executor_status: ExecutorStatusSettings::default(),
            expiration: ExpirationSettings::default(),
            logging: LoggingSettings {
                directory: DEFAULT_LOG_DIR.into(),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
