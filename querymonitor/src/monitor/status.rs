//! Fleet-wide monitor status record and its lease lock.
//!
//! One [`MonitorStatus`] exists per cluster. It holds the time of the last
//! completed sweep and is guarded by a single named lease lock; whoever
//! holds that lock is the instance allowed to sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::error::MonitorError;
use crate::cache::{CacheError, LeaseToken, LockService, LockTiming, RecordStore};
use crate::time::elapsed_millis;

/// Record key of the monitor status.
pub const MONITOR_STATUS_KEY: &str = "query-monitor-status";

/// Name of the fleet-wide monitor lock.
pub const MONITOR_LOCK_NAME: &str = "query-monitor-lock";

/// Shared "last swept" marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Epoch milliseconds of the last successful sweep; zero if never.
    pub last_checked_millis: i64,
}

impl MonitorStatus {
    pub fn checked_at(last_checked_millis: i64) -> Self {
        Self {
            last_checked_millis,
        }
    }

    /// Time of the last sweep, or `None` if the fleet has never swept.
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        if self.last_checked_millis <= 0 {
            return None;
        }
        DateTime::from_timestamp_millis(self.last_checked_millis)
    }

    /// True once at least `interval_ms` has passed since the last sweep.
    pub fn is_expired(&self, now_ms: i64, interval_ms: u64) -> bool {
        elapsed_millis(now_ms, self.last_checked_millis) >= interval_ms
    }
}

/// A held monitor lock and the instant its lease runs out.
///
/// The deadline is taken before the lock request is sent, so it never lies
/// past the lease the lock service granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLease {
    pub token: LeaseToken,
    pub expires_at: Instant,
}

impl MonitorLease {
    /// True once the lock service may have handed the lock to someone else.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left on the lease, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Access to the shared monitor status and the monitor lock.
#[derive(Clone)]
pub struct MonitorStatusCache {
    locks: Arc<dyn LockService>,
    records: Arc<dyn RecordStore<MonitorStatus>>,
}

impl MonitorStatusCache {
    pub fn new(locks: Arc<dyn LockService>, records: Arc<dyn RecordStore<MonitorStatus>>) -> Self {
        Self { locks, records }
    }

    /// Returns the shared status, creating a zero-valued one if absent.
    ///
    /// Creation happens under the monitor lock and re-checks for a record
    /// first, so racing instances never overwrite each other's status.
    pub async fn get_status(&self, timing: LockTiming) -> Result<MonitorStatus, CacheError> {
        if let Some(status) = self.records.get(MONITOR_STATUS_KEY).await? {
            return Ok(status);
        }

        let token = self
            .locks
            .try_lock(MONITOR_LOCK_NAME, timing.wait, timing.lease)
            .await?
            .ok_or_else(|| CacheError::LockTimeout {
                name: MONITOR_LOCK_NAME.to_string(),
                waited_ms: timing.wait.as_millis() as u64,
            })?;

        let result = async {
            if let Some(status) = self.records.get(MONITOR_STATUS_KEY).await? {
                return Ok(status);
            }
            let status = MonitorStatus::default();
            self.records.put(MONITOR_STATUS_KEY, status).await?;
            debug!("Created monitor status record");
            Ok::<_, CacheError>(status)
        }
        .await;

        if let Err(e) = self.unlock(&token).await {
            warn!(lock = %token, error = %e, "Failed to release monitor lock");
        }
        result
    }

    /// Reads the shared status without locking or creating it.
    pub async fn peek_status(&self) -> Result<Option<MonitorStatus>, CacheError> {
        self.records.get(MONITOR_STATUS_KEY).await
    }

    /// Overwrites the shared status.
    pub async fn set_status(&self, status: MonitorStatus) -> Result<MonitorStatus, CacheError> {
        self.records.put(MONITOR_STATUS_KEY, status).await?;
        Ok(status)
    }

    /// Tries to take the monitor lock.
    ///
    /// Returns `Ok(None)` if another holder keeps it for the whole wait.
    /// Cancelling `interrupt` while waiting yields
    /// [`MonitorError::Interrupted`].
    pub async fn try_lock(
        &self,
        timing: LockTiming,
        interrupt: &CancellationToken,
    ) -> Result<Option<MonitorLease>, MonitorError> {
        let requested_at = Instant::now();
        tokio::select! {
            biased;

            _ = interrupt.cancelled() => Err(MonitorError::Interrupted),
            result = self.locks.try_lock(MONITOR_LOCK_NAME, timing.wait, timing.lease) => {
                Ok(result?.map(|token| MonitorLease {
                    token,
                    expires_at: requested_at + timing.lease,
                }))
            }
        }
    }

    /// Releases the monitor lock. A no-op if `token` no longer owns it.
    pub async fn unlock(&self, token: &LeaseToken) -> Result<bool, CacheError> {
        let released = self.locks.unlock(token).await?;
        if !released {
            trace!(token = %token, "Monitor lock already expired");
        }
        Ok(released)
    }
}

impl std::fmt::Debug for MonitorStatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorStatusCache").finish_non_exhaustive()
    }
}
