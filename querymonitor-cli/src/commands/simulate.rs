//! `simulate` command: a local fleet of monitor schedulers.
//!
//! Every simulated instance shares one in-memory lock service, one record
//! store per record type and one query store, just as real instances share
//! the distributed cache. Time is simulated: each round ticks every
//! instance once and then moves the clock forward by the scheduler cadence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use serde_json::json;
use tracing::info;

use querymonitor::cache::{MemoryLockService, MemoryRecordStore};
use querymonitor::config::{ConfigFile, ConfigHandle};
use querymonitor::executor_status::{ExecutorPoolStatus, ExecutorStatusCache};
use querymonitor::logging::init_logging_from;
use querymonitor::metrics::{MetricsContext, MonitorMetricsFactory};
use querymonitor::monitor::{
    MonitorCollaborators, MonitorScheduler, MonitorStatus, MonitorStatusCache,
};
use querymonitor::query::{MemoryQueryStore, QueryState, QueryStatus, RecordingQueryManagement};
use querymonitor::time::{Clock, ManualClock};

use super::load_config;
use crate::error::CliError;

pub const DEFAULT_INSTANCES: usize = 3;
pub const DEFAULT_QUERIES: usize = 20;
pub const DEFAULT_TICKS: usize = 10;

/// Time given to spawned sweeps to finish before the clock moves.
const SETTLE: Duration = Duration::from_millis(5);

/// Arguments for `querymonitor simulate`.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Path to config.ini (defaults to ~/.querymonitor/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of monitor instances in the fleet
    #[arg(long, default_value_t = DEFAULT_INSTANCES)]
    pub instances: usize,

    /// Number of synthetic queries to seed
    #[arg(long, default_value_t = DEFAULT_QUERIES)]
    pub queries: usize,

    /// Number of scheduler rounds to run
    #[arg(long, default_value_t = DEFAULT_TICKS)]
    pub ticks: usize,
}

/// Run the simulation and print per-instance counters as JSON.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    if args.instances == 0 {
        return Err(CliError::InvalidArgument(
            "--instances must be at least 1".to_string(),
        ));
    }

    let config = load_config(args.config.as_deref())?;
    config.expiration_policy()?;
    let _logging = init_logging_from(&config.logging).map_err(CliError::LoggingInit)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let report = runtime.block_on(simulate(config, &args))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Shared in-memory services standing in for the distributed cache and the
/// query service.
struct SimulatedFleet {
    locks: Arc<MemoryLockService>,
    status_records: Arc<MemoryRecordStore<MonitorStatus>>,
    pool_records: Arc<MemoryRecordStore<ExecutorPoolStatus>>,
    store: Arc<MemoryQueryStore>,
    management: Arc<RecordingQueryManagement>,
    clock: ManualClock,
}

impl SimulatedFleet {
    fn new() -> Self {
        let store = Arc::new(MemoryQueryStore::new());
        let clock = ManualClock::starting_now();
        let management = Arc::new(RecordingQueryManagement::linked_to(
            Arc::clone(&store),
            Arc::new(clock.clone()),
        ));
        Self {
            locks: Arc::new(MemoryLockService::new()),
            status_records: Arc::new(MemoryRecordStore::new()),
            pool_records: Arc::new(MemoryRecordStore::new()),
            store,
            management,
            clock,
        }
    }

    fn scheduler(&self, config: ConfigHandle, name: String) -> Result<MonitorScheduler, CliError> {
        let scheduler = MonitorScheduler::new(
            config,
            MonitorStatusCache::new(self.locks.clone(), self.status_records.clone()),
            ExecutorStatusCache::new(self.locks.clone(), self.pool_records.clone()),
            MonitorCollaborators {
                store: self.store.clone(),
                queues: self.store.clone(),
                management: self.management.clone(),
                metrics: Arc::new(MonitorMetricsFactory),
                metrics_context: Arc::new(MetricsContext::new()),
                clock: Arc::new(self.clock.clone()),
            },
        )?;
        Ok(scheduler.with_instance_name(name))
    }

    /// Seeds `count` queries cycling through healthy, stalled, user-idle,
    /// recently finished and expired.
    fn seed(&self, count: usize, config: &ConfigFile) -> Result<(), CliError> {
        let policy = config.expiration_policy()?;
        let now = self.clock.now_millis();
        let progress = policy.progress_timeout_millis() as i64;
        let idle = policy.idle_timeout_millis() as i64;
        let ttl = config.monitor.inactive_query_ttl.as_millis() as i64;

        for i in 0..count {
            let base = QueryStatus::new(format!("query-{i:04}"), format!("pool-{}", i % 3), now)
                .with_logic(format!("select * from events where shard = {i}"));
            let base = if i % 2 == 0 {
                base.with_connection_pool("reporting")
            } else {
                base
            };
            let status = match i % 5 {
                0 => base,
                1 => base.with_last_updated(now - 2 * progress),
                2 => base.with_last_used(now - 2 * idle),
                3 => base.with_state(QueryState::Closed),
                _ => base
                    .with_state(QueryState::Failed)
                    .with_last_used(now - ttl - 1)
                    .with_last_updated(now - ttl - 1),
            };
            self.store.insert(status);
        }
        Ok(())
    }

    fn pools(&self) -> Vec<ExecutorPoolStatus> {
        let mut keys = self.pool_records.keys();
        keys.sort();
        keys.iter()
            .filter_map(|key| self.pool_records.snapshot(key))
            .collect()
    }
}

async fn simulate(config: ConfigFile, args: &SimulateArgs) -> Result<serde_json::Value, CliError> {
    let fleet = SimulatedFleet::new();
    fleet.seed(args.queries, &config)?;

    let cadence = config.monitor.scheduler_cadence;
    let handle = ConfigHandle::new(config);
    let mut schedulers = (0..args.instances)
        .map(|i| fleet.scheduler(handle.clone(), format!("instance-{i}")))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        instances = args.instances,
        queries = args.queries,
        ticks = args.ticks,
        "Starting fleet simulation"
    );

    for _ in 0..args.ticks {
        for scheduler in schedulers.iter_mut() {
            scheduler.tick().await;
        }
        tokio::time::sleep(SETTLE).await;
        fleet.clock.advance(cadence);
    }

    let instances: Vec<_> = schedulers
        .iter()
        .map(|s| json!({ "instance": s.instance(), "stats": s.stats().snapshot() }))
        .collect();

    Ok(json!({
        "instances": instances,
        "remaining_queries": fleet.store.len(),
        "management_calls": fleet.management.calls().len(),
        "pools": fleet.pools(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_instance_cleans_up_expired_queries() {
        let args = SimulateArgs {
            config: None,
            instances: 1,
            queries: 10,
            ticks: 2,
        };

        let report = simulate(ConfigFile::default(), &args).await.unwrap();

        // Two of the ten seeded queries are past retention.
        assert_eq!(report["remaining_queries"], 8);
        assert_eq!(report["instances"][0]["instance"], "instance-0");
        assert!(report["instances"][0]["stats"]["sweeps_launched"].as_u64().unwrap() >= 1);
        assert_eq!(report["instances"][0]["stats"]["queries_deleted"], 2);
    }

    #[tokio::test]
    async fn test_fleet_sweeps_once_per_round() {
        let args = SimulateArgs {
            config: None,
            instances: 4,
            queries: 5,
            ticks: 3,
        };

        let report = simulate(ConfigFile::default(), &args).await.unwrap();

        let launched: u64 = report["instances"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["stats"]["sweeps_launched"].as_u64().unwrap())
            .sum();
        assert_eq!(launched, 3);
    }

    #[test]
    fn test_rejects_empty_fleet() {
        let args = SimulateArgs {
            config: None,
            instances: 0,
            queries: 1,
            ticks: 1,
        };
        assert!(matches!(run(args), Err(CliError::InvalidArgument(_))));
    }
}
