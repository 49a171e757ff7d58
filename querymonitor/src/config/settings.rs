//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;
use std::time::Duration;

use super::units::TimedValue;

/// Complete monitor configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Scheduler cadence, sweep interval, fleet lock and retention
    pub monitor: MonitorSettings,
    /// Per-pool running-count aggregation
    pub executor_status: ExecutorStatusSettings,
    /// Query timeout thresholds
    pub expiration: ExpirationSettings,
    /// Log output location
    pub logging: LoggingSettings,
}

/// Monitor scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// How often the local timer ticks.
    pub scheduler_cadence: Duration,
    /// Minimum time between fleet-wide sweeps. Also the age after which a
    /// local sweep is considered wedged and abandoned.
    pub interval: TimedValue,
    /// How long to wait for the fleet lock. Zero means fail fast.
    pub lock_wait: TimedValue,
    /// How long the fleet lock is held before it expires on its own.
    pub lock_lease: TimedValue,
    /// Retention for queries that are no longer running.
    pub inactive_query_ttl: TimedValue,
}

/// Executor pool status aggregation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorStatusSettings {
    /// How long to wait for a pool's status lock.
    pub lock_wait: TimedValue,
    /// Lease on a pool's status lock.
    pub lock_lease: TimedValue,
    /// Connection pool counted for queries that do not name one.
    pub default_connection_pool: String,
}

/// Query expiration thresholds.
///
/// The three derived thresholds are optional; when unset they are computed
/// from `call_timeout` by [`crate::expiration::ExpirationPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExpirationSettings {
    pub idle_timeout: TimedValue,
    pub progress_timeout: TimedValue,
    pub call_timeout: TimedValue,
    pub call_timeout_interval: TimedValue,
    pub page_min_timeout: TimedValue,
    pub page_max_timeout: TimedValue,
    pub short_circuit_check_time: Option<TimedValue>,
    pub short_circuit_timeout: Option<TimedValue>,
    pub long_running_query_timeout: Option<TimedValue>,
    pub max_long_running_timeout_retries: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files
    pub directory: PathBuf,
    /// Log file name
    pub file: String,
}
