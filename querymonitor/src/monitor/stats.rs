//! Monitor activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::task::SweepAction;
use crate::executor_status::AggregationOutcome;

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStatsSnapshot {
    pub ticks: u64,
    pub sweeps_launched: u64,
    pub sweeps_completed: u64,
    pub sweeps_failed: u64,
    pub sweeps_abandoned: u64,
    /// Ticks where the sweep was due but another holder had the lock.
    pub lock_contention_skips: u64,
    pub queries_deleted: u64,
    pub queues_deleted: u64,
    pub pokes: u64,
    pub cancels: u64,
    pub action_failures: u64,
    pub pools_aggregated: u64,
    pub aggregation_failures: u64,
}

impl MonitorStatsSnapshot {
    /// Total policy actions that succeeded.
    pub fn actions(&self) -> u64 {
        self.queries_deleted + self.queues_deleted + self.pokes + self.cancels
    }
}

/// Monitor counters, shared between the scheduler and its sweeps.
#[derive(Debug, Default)]
pub struct MonitorStats {
    ticks: AtomicU64,
    sweeps_launched: AtomicU64,
    sweeps_completed: AtomicU64,
    sweeps_failed: AtomicU64,
    sweeps_abandoned: AtomicU64,
    lock_contention_skips: AtomicU64,
    queries_deleted: AtomicU64,
    queues_deleted: AtomicU64,
    pokes: AtomicU64,
    cancels: AtomicU64,
    action_failures: AtomicU64,
    pools_aggregated: AtomicU64,
    aggregation_failures: AtomicU64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch(&self) {
        self.sweeps_launched.fetch_add(1, Ordering::Relaxed);
    }

    /// Action counts are recorded as they happen, not here.
    pub fn record_completion(&self) {
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.sweeps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.sweeps_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contention(&self) {
        self.lock_contention_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action(&self, action: SweepAction) {
        let counter = match action {
            SweepAction::DeleteQuery => &self.queries_deleted,
            SweepAction::DeleteQueue => &self.queues_deleted,
            SweepAction::Poke => &self.pokes,
            SweepAction::Cancel => &self.cancels,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_failure(&self) {
        self.action_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregation(&self, outcome: AggregationOutcome) {
        self.pools_aggregated
            .fetch_add(outcome.pools_updated, Ordering::Relaxed);
        self.aggregation_failures
            .fetch_add(outcome.pools_failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorStatsSnapshot {
        MonitorStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            sweeps_launched: self.sweeps_launched.load(Ordering::Relaxed),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            sweeps_failed: self.sweeps_failed.load(Ordering::Relaxed),
            sweeps_abandoned: self.sweeps_abandoned.load(Ordering::Relaxed),
            lock_contention_skips: self.lock_contention_skips.load(Ordering::Relaxed),
            queries_deleted: self.queries_deleted.load(Ordering::Relaxed),
            queues_deleted: self.queues_deleted.load(Ordering::Relaxed),
            pokes: self.pokes.load(Ordering::Relaxed),
            cancels: self.cancels.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
            pools_aggregated: self.pools_aggregated.load(Ordering::Relaxed),
            aggregation_failures: self.aggregation_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = MonitorStats::new();
        stats.record_tick();
        stats.record_tick();
        stats.record_launch();
        stats.record_action(SweepAction::Poke);
        stats.record_action(SweepAction::Cancel);
        stats.record_action(SweepAction::DeleteQueue);
        stats.record_action_failure();
        stats.record_aggregation(AggregationOutcome {
            pools_updated: 3,
            pools_failed: 1,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.sweeps_launched, 1);
        assert_eq!(snapshot.pokes, 1);
        assert_eq!(snapshot.cancels, 1);
        assert_eq!(snapshot.queues_deleted, 1);
        assert_eq!(snapshot.actions(), 3);
        assert_eq!(snapshot.action_failures, 1);
        assert_eq!(snapshot.pools_aggregated, 3);
        assert_eq!(snapshot.aggregation_failures, 1);
    }

    #[test]
    fn snapshot_serializes_field_names() {
        let json = serde_json::to_string(&MonitorStatsSnapshot::default()).unwrap();
        assert!(json.contains("\"lock_contention_skips\":0"));
    }
}
