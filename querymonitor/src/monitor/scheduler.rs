//! Monitor scheduler daemon.
//!
//! The scheduler is the only part of the monitor with a timer. On every
//! tick it:
//!
//! 1. Reaps the previous sweep if it has finished
//! 2. Otherwise abandons it if it has outlived the monitor interval or the
//!    monitor lock lease, whichever is shorter
//! 3. Takes one snapshot of all query statuses
//! 4. If no sweep is running and the fleet has not swept this interval,
//!    takes the monitor lock and launches a sweep over the snapshot
//! 5. Folds the same snapshot into per-pool running counts and writes them
//!    to the executor status records
//!
//! Configuration is re-read at the start of every tick, so a reload takes
//! effect on the next one. A changed cadence rebuilds the ticker.
//!
//! # Example
//!
//! ```ignore
//! use querymonitor::monitor::MonitorScheduler;
//!
//! let scheduler = MonitorScheduler::new(config, status_cache, executor_status, collaborators)?;
//! tokio::spawn(scheduler.run(shutdown_token));
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::MonitorError;
use super::handle::{SweepEpoch, SweepGeneration, SweepHandle, SweepResult};
use super::stats::{MonitorStats, MonitorStatsSnapshot};
use super::status::MonitorStatusCache;
use super::task::{MonitorCollaborators, MonitorTask, SweepSettings};
use crate::cache::{CacheError, LockTiming};
use crate::config::{ConfigFile, ConfigHandle};
use crate::executor_status::{aggregate_running_counts, AggregationOutcome, ExecutorStatusCache};
use crate::expiration::ExpirationPolicy;
use crate::query::QueryStatus;

/// How long shutdown waits for an in-flight sweep to stop.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Result of a previous sweep reaped this tick.
    pub reaped: Option<SweepResult>,
    /// Sweep abandoned this tick for outliving the interval or its lease.
    pub abandoned: Option<SweepEpoch>,
    /// Sweep launched this tick.
    pub launched: Option<SweepEpoch>,
    /// A sweep was due but the monitor lock was held elsewhere.
    pub lock_contended: bool,
    pub aggregation: AggregationOutcome,
}

/// Periodic driver of sweeps and pool-count aggregation for one instance.
pub struct MonitorScheduler {
    instance: String,
    config: ConfigHandle,
    policy: ExpirationPolicy,
    status_cache: MonitorStatusCache,
    executor_status: ExecutorStatusCache,
    collaborators: MonitorCollaborators,
    stats: Arc<MonitorStats>,
    generation: SweepGeneration,
    current: Option<SweepHandle>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
}

impl MonitorScheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Policy`] if the current configuration does
    /// not yield a valid expiration policy.
    pub fn new(
        config: ConfigHandle,
        status_cache: MonitorStatusCache,
        executor_status: ExecutorStatusCache,
        collaborators: MonitorCollaborators,
    ) -> Result<Self, MonitorError> {
        let policy = config.current().expiration_policy()?;
        Ok(Self {
            instance: "monitor".to_string(),
            config,
            policy,
            status_cache,
            executor_status,
            collaborators,
            stats: Arc::new(MonitorStats::new()),
            generation: SweepGeneration::new(),
            current: None,
            shutdown: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Sets the instance name used in log output.
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance = name.into();
        self
    }

    /// Shares an existing counter set.
    pub fn with_stats(mut self, stats: Arc<MonitorStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Sets how long shutdown waits for an in-flight sweep.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    /// True while a launched sweep has not been reaped or abandoned.
    pub fn has_active_sweep(&self) -> bool {
        self.current.is_some()
    }

    /// Runs one scheduler tick.
    pub async fn tick(&mut self) -> TickReport {
        self.stats.record_tick();
        let config = self.config.current();
        self.refresh_policy(&config);

        let mut report = TickReport::default();
        let limit = config
            .monitor
            .interval
            .as_duration()
            .min(config.monitor.lock_lease.as_duration());
        self.supervise(limit, &mut report).await;

        let snapshot = match self.collaborators.store.list_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "Failed to read query statuses, skipping tick");
                return report;
            }
        };

        let counts = aggregate_running_counts(
            &snapshot,
            &config.executor_status.default_connection_pool,
        );

        if self.current.is_none() {
            self.maybe_launch(&config, snapshot, &mut report).await;
        }

        let timing = LockTiming::from_config(
            config.executor_status.lock_wait,
            config.executor_status.lock_lease,
        );
        report.aggregation = self.executor_status.publish(counts, timing).await;
        self.stats.record_aggregation(report.aggregation);
        if report.aggregation.pools_updated > 0 || report.aggregation.pools_failed > 0 {
            debug!(
                instance = %self.instance,
                updated = report.aggregation.pools_updated,
                failed = report.aggregation.pools_failed,
                "Aggregated running queries"
            );
        }

        report
    }

    /// Runs the scheduler until shutdown is signalled.
    ///
    /// Returns the final counters. An in-flight sweep is cancelled and given
    /// the shutdown grace period to stop.
    pub async fn run(mut self, shutdown: CancellationToken) -> MonitorStatsSnapshot {
        self.shutdown = shutdown.clone();

        let mut cadence = self.config.current().monitor.scheduler_cadence;
        let mut ticker = Self::ticker(cadence, Instant::now());

        info!(
            instance = %self.instance,
            cadence_ms = cadence.as_millis() as u64,
            "Monitor scheduler starting"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(instance = %self.instance, "Monitor scheduler shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.tick().await;

                    let configured = self.config.current().monitor.scheduler_cadence;
                    if configured != cadence {
                        info!(
                            instance = %self.instance,
                            old_ms = cadence.as_millis() as u64,
                            new_ms = configured.as_millis() as u64,
                            "Scheduler cadence changed"
                        );
                        cadence = configured;
                        ticker = Self::ticker(cadence, Instant::now() + cadence);
                    }
                }
            }
        }

        self.drain().await;
        self.stats.snapshot()
    }

    fn ticker(cadence: Duration, start: Instant) -> Interval {
        let period = cadence.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    fn refresh_policy(&mut self, config: &ConfigFile) {
        match config.expiration_policy() {
            Ok(policy) => self.policy = policy,
            Err(e) => warn!(
                instance = %self.instance,
                error = %e,
                "Invalid expiration policy in configuration, keeping previous"
            ),
        }
    }

    /// Reaps a finished sweep or abandons one older than `limit`.
    async fn supervise(&mut self, limit: Duration, report: &mut TickReport) {
        let Some(handle) = self.current.take() else {
            return;
        };

        if handle.is_finished() {
            let epoch = handle.epoch();
            let result = handle.join().await;
            self.record_outcome(epoch, &result);
            report.reaped = Some(result);
        } else if handle.age() > limit {
            let epoch = handle.epoch();
            let age_ms = handle.age().as_millis() as u64;
            handle.abandon(&self.generation);
            self.stats.record_abandoned();
            warn!(
                instance = %self.instance,
                epoch = %epoch,
                age_ms,
                limit_ms = limit.as_millis() as u64,
                "Sweep outlived its interval or lease, abandoning"
            );
            report.abandoned = Some(epoch);
        } else {
            self.current = Some(handle);
        }
    }

    fn record_outcome(&self, epoch: SweepEpoch, result: &SweepResult) {
        match result {
            Ok(_) => self.stats.record_completion(),
            Err(MonitorError::TaskPanicked(message)) => {
                error!(instance = %self.instance, epoch = %epoch, panic = %message, "Sweep task panicked");
                self.stats.record_failure();
            }
            Err(MonitorError::Abandoned) => {
                warn!(instance = %self.instance, epoch = %epoch, "Sweep abandoned after its lease ran out");
                self.stats.record_abandoned();
            }
            Err(e) if e.is_interruption() => {
                debug!(instance = %self.instance, epoch = %epoch, error = %e, "Sweep interrupted");
                self.stats.record_failure();
            }
            Err(e) => {
                warn!(instance = %self.instance, epoch = %epoch, error = %e, "Sweep failed");
                self.stats.record_failure();
            }
        }
    }

    /// Launches a sweep if the fleet is due one and the lock is free.
    async fn maybe_launch(
        &mut self,
        config: &ConfigFile,
        snapshot: Vec<QueryStatus>,
        report: &mut TickReport,
    ) {
        let timing = LockTiming::from_config(config.monitor.lock_wait, config.monitor.lock_lease);
        let interval_ms = config.monitor.interval.as_millis();

        let status = match self.status_cache.get_status(timing).await {
            Ok(status) => status,
            Err(CacheError::LockTimeout { .. }) => {
                debug!(instance = %self.instance, "Monitor status being created elsewhere");
                self.stats.record_contention();
                report.lock_contended = true;
                return;
            }
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "Failed to read monitor status");
                return;
            }
        };

        let now_ms = self.collaborators.clock.now_millis();
        if !status.is_expired(now_ms, interval_ms) {
            debug!(
                instance = %self.instance,
                last_checked = status.last_checked_millis,
                "Sweep not due"
            );
            return;
        }

        let lease = match self.status_cache.try_lock(timing, &self.shutdown).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(instance = %self.instance, "Monitor lock held elsewhere, skipping sweep");
                self.stats.record_contention();
                report.lock_contended = true;
                return;
            }
            Err(e) => {
                debug!(instance = %self.instance, error = %e, "Could not take monitor lock");
                return;
            }
        };

        let epoch = self.generation.advance();
        let cancel = self.shutdown.child_token();
        let settings = SweepSettings {
            policy: self.policy,
            inactive_ttl_ms: config.monitor.inactive_query_ttl.as_millis(),
            interval_ms,
        };
        let queries = snapshot.len();
        let task = MonitorTask::new(
            snapshot,
            settings,
            self.collaborators.clone(),
            self.status_cache.clone(),
            lease,
            epoch,
            self.generation.clone(),
            cancel.clone(),
            Arc::clone(&self.stats),
        );

        self.current = Some(SweepHandle::new(epoch, cancel, tokio::spawn(task.run())));
        self.stats.record_launch();
        debug!(instance = %self.instance, epoch = %epoch, queries, "Sweep launched");
        report.launched = Some(epoch);
    }

    /// Stops the in-flight sweep on shutdown.
    async fn drain(&mut self) {
        let Some(handle) = self.current.take() else {
            return;
        };
        let epoch = handle.epoch();
        handle.cancel();

        match tokio::time::timeout(self.shutdown_grace, handle.join()).await {
            Ok(result) => self.record_outcome(epoch, &result),
            Err(_) => warn!(
                instance = %self.instance,
                epoch = %epoch,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Sweep did not stop within shutdown grace period"
            ),
        }
    }
}

impl std::fmt::Debug for MonitorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorScheduler")
            .field("instance", &self.instance)
            .field("current", &self.current.as_ref().map(SweepHandle::epoch))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LockService, MemoryLockService, MemoryRecordStore, RecordStore};
    use crate::config::TimedValue;
    use crate::executor_status::ExecutorPoolStatus;
    use crate::metrics::{MetricsContext, MonitorMetricsFactory, QueryMetric};
    use crate::monitor::{MonitorStatus, MONITOR_LOCK_NAME, MONITOR_STATUS_KEY};
    use crate::query::{
        MemoryQueryStore, QueryManagement, QueryServiceError, QueryState,
        RecordingQueryManagement,
    };
    use crate::time::ManualClock;
    use futures::future::BoxFuture;
    use futures::FutureExt;

    const NOW: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    struct Fleet {
        locks: Arc<MemoryLockService>,
        status_records: Arc<MemoryRecordStore<MonitorStatus>>,
        pool_records: Arc<MemoryRecordStore<ExecutorPoolStatus>>,
        store: Arc<MemoryQueryStore>,
        management: Arc<RecordingQueryManagement>,
        clock: ManualClock,
        config: ConfigHandle,
    }

    impl Fleet {
        fn new() -> Self {
            Self {
                locks: Arc::new(MemoryLockService::new()),
                status_records: Arc::new(MemoryRecordStore::new()),
                pool_records: Arc::new(MemoryRecordStore::new()),
                store: Arc::new(MemoryQueryStore::new()),
                management: Arc::new(RecordingQueryManagement::new()),
                clock: ManualClock::new(NOW),
                config: ConfigHandle::new(ConfigFile::default()),
            }
        }

        fn scheduler_with(&self, management: Arc<dyn QueryManagement>) -> MonitorScheduler {
            MonitorScheduler::new(
                self.config.clone(),
                MonitorStatusCache::new(self.locks.clone(), self.status_records.clone()),
                ExecutorStatusCache::new(self.locks.clone(), self.pool_records.clone()),
                MonitorCollaborators {
                    store: self.store.clone(),
                    queues: self.store.clone(),
                    management,
                    metrics: Arc::new(MonitorMetricsFactory),
                    metrics_context: Arc::new(MetricsContext::new()),
                    clock: Arc::new(self.clock.clone()),
                },
            )
            .unwrap()
        }

        fn scheduler(&self) -> MonitorScheduler {
            self.scheduler_with(self.management.clone())
        }

        fn last_checked(&self) -> Option<i64> {
            self.status_records
                .snapshot(MONITOR_STATUS_KEY)
                .map(|s| s.last_checked_millis)
        }
    }

    /// Waits for the spawned sweep to finish.
    async fn settle(scheduler: &MonitorScheduler) {
        for _ in 0..100 {
            match &scheduler.current {
                Some(handle) if !handle.is_finished() => tokio::task::yield_now().await,
                _ => return,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_launches_and_next_tick_reaps() {
        let fleet = Fleet::new();
        fleet.store.insert(
            QueryStatus::new("q1", "poolA", NOW).with_last_updated(NOW - 6 * MINUTE),
        );
        let mut scheduler = fleet.scheduler();

        let report = scheduler.tick().await;
        assert!(report.launched.is_some());
        assert!(scheduler.has_active_sweep());
        assert_eq!(report.aggregation.pools_updated, 1);

        settle(&scheduler).await;
        let report = scheduler.tick().await;
        assert!(matches!(report.reaped, Some(Ok(ref r)) if r.pokes == 1));
        assert!(report.launched.is_none(), "interval already swept");

        assert_eq!(fleet.last_checked(), Some(NOW));
        assert!(!fleet.locks.is_locked(MONITOR_LOCK_NAME));
        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.sweeps_launched, 1);
        assert_eq!(stats.sweeps_completed, 1);
        assert_eq!(stats.ticks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_not_due_within_interval() {
        let fleet = Fleet::new();
        fleet
            .status_records
            .put(MONITOR_STATUS_KEY, MonitorStatus::checked_at(NOW - 29_999))
            .await
            .unwrap();
        let mut scheduler = fleet.scheduler();

        assert!(scheduler.tick().await.launched.is_none());

        fleet.clock.advance(Duration::from_millis(1));
        assert!(scheduler.tick().await.launched.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn contended_lock_skips_sweep() {
        let fleet = Fleet::new();
        let mut scheduler = fleet.scheduler();
        fleet
            .status_records
            .put(MONITOR_STATUS_KEY, MonitorStatus::default())
            .await
            .unwrap();
        fleet
            .locks
            .try_lock(MONITOR_LOCK_NAME, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let report = scheduler.tick().await;
        assert!(report.lock_contended);
        assert!(report.launched.is_none());
        assert_eq!(scheduler.stats().snapshot().lock_contention_skips, 1);
    }

    /// Management facade that never answers.
    struct Wedged;

    impl QueryManagement for Wedged {
        fn cancel<'a>(
            &'a self,
            _query_id: &'a str,
            _system_initiated: bool,
            _metric: &'a QueryMetric,
        ) -> BoxFuture<'a, Result<(), QueryServiceError>> {
            futures::future::pending().boxed()
        }

        fn publish_next_event<'a>(
            &'a self,
            _query_id: &'a str,
            _pool_name: &'a str,
        ) -> BoxFuture<'a, Result<(), QueryServiceError>> {
            futures::future::pending().boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_sweep_is_abandoned_and_replaced() {
        let fleet = Fleet::new();
        let mut config = ConfigFile::default();
        config.monitor.lock_lease = TimedValue::minutes(1);
        fleet.config.replace(config);
        fleet.store.insert(
            QueryStatus::new("stuck", "poolA", NOW).with_last_updated(NOW - 10 * MINUTE),
        );
        let mut scheduler = fleet.scheduler_with(Arc::new(Wedged));

        let first = scheduler.tick().await.launched.unwrap();

        // Still within the interval: the sweep is left alone.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let report = scheduler.tick().await;
        assert!(report.abandoned.is_none());
        assert!(scheduler.has_active_sweep());

        // Past the interval: abandoned. The abandoned sweep still releases
        // the lock it holds, so the next tick launches a replacement.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let report = scheduler.tick().await;
        assert_eq!(report.abandoned, Some(first));
        assert!(!scheduler.has_active_sweep());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!fleet.locks.is_locked(MONITOR_LOCK_NAME));
        let second = scheduler.tick().await.launched.expect("replacement sweep");
        assert!(second > first);

        assert_eq!(fleet.last_checked(), Some(0));
        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.sweeps_abandoned, 1);
        assert_eq!(stats.sweeps_launched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_stops_when_lease_runs_out_before_interval() {
        let fleet = Fleet::new();
        let mut config = ConfigFile::default();
        config.monitor.lock_lease = TimedValue::seconds(10);
        fleet.config.replace(config);
        fleet.store.insert(
            QueryStatus::new("stuck", "poolA", NOW).with_last_updated(NOW - 10 * MINUTE),
        );
        let mut scheduler = fleet.scheduler_with(Arc::new(Wedged));

        scheduler.tick().await.launched.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(scheduler.tick().await.reaped.is_none());
        assert!(scheduler.has_active_sweep());

        // The sweep gives up at its lease deadline, well inside the interval.
        tokio::time::sleep(Duration::from_secs(6)).await;
        let report = scheduler.tick().await;
        assert!(matches!(report.reaped, Some(Err(MonitorError::Abandoned))));
        assert!(report.launched.is_some(), "lease expired, lock is free");

        assert_eq!(fleet.last_checked(), Some(0));
        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.sweeps_abandoned, 1);
        assert_eq!(stats.sweeps_failed, 0);
        assert_eq!(stats.sweeps_launched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregation_runs_without_sweep() {
        let fleet = Fleet::new();
        fleet
            .status_records
            .put(MONITOR_STATUS_KEY, MonitorStatus::checked_at(NOW))
            .await
            .unwrap();
        fleet
            .store
            .insert(QueryStatus::new("1", "poolA", NOW).with_connection_pool("x"));
        fleet.store.insert(QueryStatus::new("2", "poolA", NOW));
        fleet
            .store
            .insert(QueryStatus::new("3", "poolB", NOW).with_state(QueryState::Closed));
        let mut scheduler = fleet.scheduler();

        let report = scheduler.tick().await;
        assert!(report.launched.is_none());
        assert_eq!(report.aggregation.pools_updated, 1);

        let pool_a = fleet
            .pool_records
            .snapshot(&ExecutorStatusCache::record_key("poolA"))
            .unwrap();
        assert_eq!(pool_a.query_count_by_connection_pool.get("x"), Some(&1));
        assert_eq!(pool_a.query_count_by_connection_pool.get("default"), Some(&1));
        assert!(fleet
            .pool_records
            .snapshot(&ExecutorStatusCache::record_key("poolB"))
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reloaded_config_applies_next_tick() {
        let fleet = Fleet::new();
        fleet
            .status_records
            .put(
                MONITOR_STATUS_KEY,
                MonitorStatus::checked_at(NOW - 2 * MINUTE),
            )
            .await
            .unwrap();
        let mut scheduler = fleet.scheduler();

        let mut config = ConfigFile::default();
        config.monitor.interval = TimedValue::minutes(5);
        fleet.config.replace(config);
        assert!(scheduler.tick().await.launched.is_none());

        let mut config = ConfigFile::default();
        config.monitor.interval = TimedValue::minutes(1);
        fleet.config.replace(config);
        assert!(scheduler.tick().await.launched.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown() {
        let fleet = Fleet::new();
        fleet.store.insert(
            QueryStatus::new("q2", "poolA", NOW - 25 * 60 * MINUTE).with_state(QueryState::Closed),
        );
        let scheduler = fleet.scheduler();
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown.cancel();
        let stats = running.await.unwrap();

        assert!(stats.ticks >= 3);
        assert_eq!(stats.sweeps_launched, 1);
        assert_eq!(fleet.store.deleted(), vec!["q2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_in_flight_sweep() {
        let fleet = Fleet::new();
        fleet.store.insert(
            QueryStatus::new("stuck", "poolA", NOW).with_last_updated(NOW - 10 * MINUTE),
        );
        let scheduler = fleet.scheduler_with(Arc::new(Wedged));
        let stats = scheduler.stats();
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        let final_stats = running.await.unwrap();

        assert_eq!(final_stats.sweeps_launched, 1);
        assert_eq!(final_stats.sweeps_failed, 1);
        assert_eq!(stats.snapshot(), final_stats);
        assert!(!fleet.locks.is_locked(MONITOR_LOCK_NAME));
    }
}
