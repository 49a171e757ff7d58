//! Fleet-wide query monitor.
//!
//! Every service instance runs a [`MonitorScheduler`]. The schedulers share
//! one [`MonitorStatus`] record and one lease lock through the distributed
//! cache; whichever instance holds the lock when the status goes stale runs
//! a [`MonitorTask`] sweep, applying the timeout policy to every query.
//!
//! # Architecture
//!
//! ```text
//!   tick ──▶ supervise previous sweep (reap / abandon)
//!        ──▶ snapshot query statuses ─────────────────────┐
//!        ──▶ status stale? ──▶ try monitor lock ──▶ spawn │ MonitorTask
//!        ──▶ fold snapshot into pool counts ──▶ ExecutorStatusCache
//! ```
//!
//! At most one sweep runs per process. The lease lock bounds it to one per
//! fleet, and sweep generations keep an abandoned sweep from acting after a
//! replacement has started.

mod error;
mod handle;
mod scheduler;
mod stats;
mod status;
mod task;

pub use error::MonitorError;
pub use handle::{SweepEpoch, SweepGeneration, SweepHandle, SweepResult};
pub use scheduler::{MonitorScheduler, TickReport, DEFAULT_SHUTDOWN_GRACE};
pub use stats::{MonitorStats, MonitorStatsSnapshot};
pub use status::{
    MonitorLease, MonitorStatus, MonitorStatusCache, MONITOR_LOCK_NAME, MONITOR_STATUS_KEY,
};
pub use task::{decide, MonitorCollaborators, MonitorTask, SweepAction, SweepReport, SweepSettings};
