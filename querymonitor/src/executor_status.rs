//! Shared executor pool status and running-query aggregation.
//!
//! Every tick, each monitor instance folds its query snapshot into
//! per-pool, per-connection-pool running counts and writes them into the
//! pool's shared [`ExecutorPoolStatus`]. Admission control elsewhere in the
//! service reads these records; this module only owns the
//! `query_count_by_connection_pool` field and replaces it wholesale.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{locked_update, CacheError, LockService, LockTiming, RecordStore};
use crate::query::QueryStatus;

/// Running-query counts: pool name to connection-pool name to count.
pub type PoolCounts = BTreeMap<String, BTreeMap<String, u64>>;

/// Shared status record of one resource pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorPoolStatus {
    pub pool_name: String,
    /// Running queries per connection pool, written by the monitor.
    pub query_count_by_connection_pool: HashMap<String, u64>,
    /// Maximum concurrent queries, maintained by the executors.
    pub capacity: Option<u64>,
}

impl ExecutorPoolStatus {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            ..Self::default()
        }
    }

    /// Total running queries across connection pools.
    pub fn running_queries(&self) -> u64 {
        self.query_count_by_connection_pool.values().sum()
    }
}

/// Folds a snapshot into running counts per pool and connection pool.
///
/// Only running queries are counted, so pools without a running query do
/// not appear. A query without a connection pool counts against
/// `default_connection_pool`.
pub fn aggregate_running_counts(snapshot: &[QueryStatus], default_connection_pool: &str) -> PoolCounts {
    snapshot
        .iter()
        .filter(|s| s.is_running())
        .fold(PoolCounts::new(), |mut counts, status| {
            *counts
                .entry(status.pool_name.clone())
                .or_default()
                .entry(status.connection_pool_or(default_connection_pool).to_string())
                .or_default() += 1;
            counts
        })
}

/// Outcome of publishing one tick's counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationOutcome {
    pub pools_updated: u64,
    pub pools_failed: u64,
}

/// Executor pool status records, updated under a per-pool lock.
#[derive(Clone)]
pub struct ExecutorStatusCache {
    locks: Arc<dyn LockService>,
    records: Arc<dyn RecordStore<ExecutorPoolStatus>>,
}

impl ExecutorStatusCache {
    pub fn new(
        locks: Arc<dyn LockService>,
        records: Arc<dyn RecordStore<ExecutorPoolStatus>>,
    ) -> Self {
        Self { locks, records }
    }

    /// Lock name guarding the record of `pool`.
    pub fn lock_name(pool: &str) -> String {
        format!("executor-status-lock:{pool}")
    }

    /// Record key of `pool`.
    pub fn record_key(pool: &str) -> String {
        format!("executor-status:{pool}")
    }

    /// Reads a pool's record without locking.
    pub async fn get(&self, pool: &str) -> Result<Option<ExecutorPoolStatus>, CacheError> {
        self.records.get(&Self::record_key(pool)).await
    }

    /// Replaces the connection-pool counts of `pool` under its lock.
    pub async fn update_counts(
        &self,
        pool: &str,
        counts: HashMap<String, u64>,
        timing: LockTiming,
    ) -> Result<ExecutorPoolStatus, CacheError> {
        locked_update(
            self.locks.as_ref(),
            self.records.as_ref(),
            &Self::lock_name(pool),
            &Self::record_key(pool),
            timing,
            |current| {
                let mut status = current.unwrap_or_else(|| ExecutorPoolStatus::new(pool));
                status.query_count_by_connection_pool = counts;
                status
            },
        )
        .await
    }

    /// Writes each pool's counts. A failed pool is logged and skipped.
    pub async fn publish(&self, counts: PoolCounts, timing: LockTiming) -> AggregationOutcome {
        let mut outcome = AggregationOutcome::default();

        for (pool, by_connection) in counts {
            let by_connection: HashMap<String, u64> = by_connection.into_iter().collect();
            match self.update_counts(&pool, by_connection, timing).await {
                Ok(status) => {
                    debug!(
                        pool = %pool,
                        running = status.running_queries(),
                        "Updated executor pool status"
                    );
                    outcome.pools_updated += 1;
                }
                Err(e) => {
                    warn!(pool = %pool, error = %e, "Failed to update executor pool status");
                    outcome.pools_failed += 1;
                }
            }
        }

        outcome
    }
}

impl std::fmt::Debug for ExecutorStatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorStatusCache").finish_non_exhaustive()
    }
}
