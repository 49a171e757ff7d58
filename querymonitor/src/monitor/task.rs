//! The sweep: per-query timeout policy over one snapshot.
//!
//! For each query in the snapshot:
//!
//! ```text
//! not running ── inactive past TTL ──────────▶ delete query
//!             └─ otherwise ──────────────────▶ delete result queue
//! running ────── no progress signal ─────────▶ publish "next" (poke)
//!             ├─ no client interaction ──────▶ cancel
//!             └─ otherwise ──────────────────▶ nothing
//! ```
//!
//! A failed action is logged and the sweep moves on. Only a sweep that
//! scans the whole snapshot while still owning its epoch and its lock lease
//! records the new "last checked" time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::MonitorError;
use super::handle::{SweepEpoch, SweepGeneration};
use super::stats::MonitorStats;
use super::status::{MonitorLease, MonitorStatus, MonitorStatusCache};
use crate::expiration::ExpirationPolicy;
use crate::metrics::{MetricsContext, MetricsFactory};
use crate::query::{
    QueryManagement, QueryServiceError, QueryStatus, QueryStatusStore, ResultQueueManager,
};
use crate::time::Clock;

/// Action the policy chose for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepAction {
    /// Remove the query entirely: status, task state and result queue.
    DeleteQuery,
    /// Remove only the result queue of a finished query.
    DeleteQueue,
    /// Publish a "next" event to a stalled query.
    Poke,
    Cancel,
}

impl SweepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepAction::DeleteQuery => "delete_query",
            SweepAction::DeleteQueue => "delete_queue",
            SweepAction::Poke => "poke",
            SweepAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for SweepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds a sweep evaluates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub policy: ExpirationPolicy,
    pub inactive_ttl_ms: u64,
    /// Minimum time between sweeps.
    pub interval_ms: u64,
}

/// Chooses the action for `status` at `now_ms`, if any.
///
/// Progress-idle is checked before user-idle, so a running query that is
/// both gets poked, not canceled.
pub fn decide(status: &QueryStatus, now_ms: i64, settings: &SweepSettings) -> Option<SweepAction> {
    if !status.is_running() {
        return Some(if status.is_inactive(now_ms, settings.inactive_ttl_ms) {
            SweepAction::DeleteQuery
        } else {
            SweepAction::DeleteQueue
        });
    }

    let policy = &settings.policy;
    if status.is_progress_idle(now_ms, policy.progress_timeout_millis()) {
        Some(SweepAction::Poke)
    } else if status.is_user_idle(now_ms, policy.idle_timeout_millis()) {
        Some(SweepAction::Cancel)
    } else {
        None
    }
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: u64,
    pub queries_deleted: u64,
    pub queues_deleted: u64,
    pub pokes: u64,
    pub cancels: u64,
    pub failures: u64,
    /// The sweep found another instance had already swept this interval.
    pub skipped: bool,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn record(&mut self, action: SweepAction) {
        let counter = match action {
            SweepAction::DeleteQuery => &mut self.queries_deleted,
            SweepAction::DeleteQueue => &mut self.queues_deleted,
            SweepAction::Poke => &mut self.pokes,
            SweepAction::Cancel => &mut self.cancels,
        };
        *counter += 1;
    }
}

/// Services a sweep acts through.
#[derive(Clone)]
pub struct MonitorCollaborators {
    pub store: Arc<dyn QueryStatusStore>,
    pub queues: Arc<dyn ResultQueueManager>,
    pub management: Arc<dyn QueryManagement>,
    pub metrics: Arc<dyn MetricsFactory>,
    pub metrics_context: Arc<MetricsContext>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for MonitorCollaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorCollaborators")
            .field("metrics_context", &self.metrics_context)
            .finish_non_exhaustive()
    }
}

/// One sweep over a snapshot, run while holding the monitor lock.
pub struct MonitorTask {
    snapshot: Vec<QueryStatus>,
    settings: SweepSettings,
    collaborators: MonitorCollaborators,
    status_cache: MonitorStatusCache,
    lease: MonitorLease,
    epoch: SweepEpoch,
    generation: SweepGeneration,
    cancel: CancellationToken,
    stats: Arc<MonitorStats>,
}

impl MonitorTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        snapshot: Vec<QueryStatus>,
        settings: SweepSettings,
        collaborators: MonitorCollaborators,
        status_cache: MonitorStatusCache,
        lease: MonitorLease,
        epoch: SweepEpoch,
        generation: SweepGeneration,
        cancel: CancellationToken,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            snapshot,
            settings,
            collaborators,
            status_cache,
            lease,
            epoch,
            generation,
            cancel,
            stats,
        }
    }

    /// Runs the sweep and releases the monitor lock, whatever the outcome.
    pub async fn run(self) -> Result<SweepReport, MonitorError> {
        let result = self.sweep().await;

        if let Err(e) = self.status_cache.unlock(&self.lease.token).await {
            warn!(epoch = %self.epoch, error = %e, "Failed to release monitor lock");
        }

        match &result {
            Ok(report) if report.skipped => {
                debug!(epoch = %self.epoch, "Sweep skipped, interval already swept");
            }
            Ok(report) => info!(
                epoch = %self.epoch,
                examined = report.examined,
                deleted = report.queries_deleted,
                queues_deleted = report.queues_deleted,
                pokes = report.pokes,
                cancels = report.cancels,
                failures = report.failures,
                "Sweep complete"
            ),
            Err(e) => debug!(epoch = %self.epoch, error = %e, "Sweep ended early"),
        }
        result
    }

    async fn sweep(&self) -> Result<SweepReport, MonitorError> {
        self.ensure_current()?;

        let started_ms = self.collaborators.clock.now_millis();
        let status = self.status_cache.peek_status().await?.unwrap_or_default();
        if !status.is_expired(started_ms, self.settings.interval_ms) {
            return Ok(SweepReport::skipped());
        }

        debug!(
            epoch = %self.epoch,
            queries = self.snapshot.len(),
            "Sweep starting"
        );

        let mut report = SweepReport::default();
        for query in &self.snapshot {
            self.ensure_current()?;
            report.examined += 1;
            self.evaluate(query, &mut report).await?;
        }

        self.ensure_current()?;
        let finished_ms = self.collaborators.clock.now_millis();
        self.status_cache
            .set_status(MonitorStatus::checked_at(finished_ms))
            .await?;
        Ok(report)
    }

    /// Applies the policy to one query. Only interruption is returned as an
    /// error; action failures are logged and counted.
    async fn evaluate(&self, query: &QueryStatus, report: &mut SweepReport) -> Result<(), MonitorError> {
        let now_ms = self.collaborators.clock.now_millis();
        let Some(action) = decide(query, now_ms, &self.settings) else {
            return Ok(());
        };
        let query_id = query.query_id.as_str();
        let c = &self.collaborators;

        let outcome = match action {
            SweepAction::DeleteQuery => self.interruptible(c.store.delete(query_id)).await?,
            SweepAction::DeleteQueue => self.interruptible(c.queues.delete_queue(query_id)).await?,
            SweepAction::Poke => {
                self.interruptible(c.management.publish_next_event(query_id, &query.pool_name))
                    .await?
            }
            SweepAction::Cancel => {
                let scope = c
                    .metrics_context
                    .attach(c.metrics.create_metric(query_id, now_ms));
                let outcome = self
                    .interruptible(c.management.cancel(query_id, true, scope.metric()))
                    .await;
                drop(scope);
                outcome?
            }
        };

        match outcome {
            Ok(()) => {
                debug!(query_id, action = %action, pool = %query.pool_name, "Monitor action applied");
                report.record(action);
                self.stats.record_action(action);
            }
            Err(e) => {
                warn!(query_id, action = %action, error = %e, "Monitor action failed");
                report.failures += 1;
                self.stats.record_action_failure();
            }
        }
        Ok(())
    }

    /// Runs a collaborator call unless the sweep is cancelled or its lease
    /// runs out first.
    async fn interruptible<F>(&self, call: F) -> Result<Result<(), QueryServiceError>, MonitorError>
    where
        F: Future<Output = Result<(), QueryServiceError>>,
    {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err(self.stop_reason()),
            _ = tokio::time::sleep_until(self.lease.expires_at) => {
                warn!(epoch = %self.epoch, "Monitor lease expired mid-call, abandoning sweep");
                Err(MonitorError::Abandoned)
            }
            outcome = call => Ok(outcome),
        }
    }

    /// Fails once the sweep may no longer act. Past the lease deadline
    /// another instance may already hold the lock.
    fn ensure_current(&self) -> Result<(), MonitorError> {
        if self.cancel.is_cancelled()
            || !self.generation.is_current(self.epoch)
            || self.lease.is_expired()
        {
            return Err(self.stop_reason());
        }
        Ok(())
    }

    fn stop_reason(&self) -> MonitorError {
        if self.generation.is_current(self.epoch) && !self.lease.is_expired() {
            MonitorError::Interrupted
        } else {
            MonitorError::Abandoned
        }
    }
}

impl fmt::Debug for MonitorTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorTask")
            .field("epoch", &self.epoch)
            .field("queries", &self.snapshot.len())
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}
