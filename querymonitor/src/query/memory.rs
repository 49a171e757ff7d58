//! In-memory query collaborators.
//!
//! [`MemoryQueryStore`] holds query statuses and result queues;
//! [`RecordingQueryManagement`] records every cancel and "next" event it is
//! asked for. Both can be told to fail for chosen queries, and the
//! management facade can be linked to a store so that its actions show up
//! in later snapshots (used by the fleet simulation).

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use super::status::{QueryState, QueryStatus};
use super::traits::{QueryManagement, QueryServiceError, QueryStatusStore, ResultQueueManager};
use crate::metrics::QueryMetric;
use crate::time::Clock;

/// Query status store and result queues held in memory.
#[derive(Debug, Default)]
pub struct MemoryQueryStore {
    statuses: DashMap<String, QueryStatus>,
    queues: DashSet<String>,
    failing: DashSet<String>,
    deleted: Mutex<Vec<String>>,
    queues_deleted: Mutex<Vec<String>>,
}

impl MemoryQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a query along with its result queue.
    pub fn insert(&self, status: QueryStatus) {
        self.queues.insert(status.query_id.clone());
        self.statuses.insert(status.query_id.clone(), status);
    }

    /// Makes `delete` and `delete_queue` fail for `query_id`.
    pub fn fail_for(&self, query_id: impl Into<String>) {
        self.failing.insert(query_id.into());
    }

    pub fn status(&self, query_id: &str) -> Option<QueryStatus> {
        self.statuses.get(query_id).map(|s| s.value().clone())
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.statuses.contains_key(query_id)
    }

    pub fn has_queue(&self, query_id: &str) -> bool {
        self.queues.contains(query_id)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Query ids passed to successful `delete` calls, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Query ids passed to successful `delete_queue` calls, in call order.
    pub fn queues_deleted(&self) -> Vec<String> {
        self.queues_deleted.lock().clone()
    }

    fn check(&self, query_id: &str) -> Result<(), QueryServiceError> {
        if self.failing.contains(query_id) {
            return Err(QueryServiceError::Storage(format!(
                "injected failure for {query_id}"
            )));
        }
        Ok(())
    }

    fn set_state(&self, query_id: &str, state: QueryState) {
        if let Some(mut status) = self.statuses.get_mut(query_id) {
            status.state = state;
        }
    }

    fn touch_progress(&self, query_id: &str, now_ms: i64) {
        if let Some(mut status) = self.statuses.get_mut(query_id) {
            status.last_updated_millis = now_ms;
        }
    }
}

impl QueryStatusStore for MemoryQueryStore {
    fn list_all(&self) -> BoxFuture<'_, Result<Vec<QueryStatus>, QueryServiceError>> {
        let snapshot: Vec<QueryStatus> = self.statuses.iter().map(|s| s.value().clone()).collect();
        async move { Ok(snapshot) }.boxed()
    }

    fn delete<'a>(&'a self, query_id: &'a str) -> BoxFuture<'a, Result<(), QueryServiceError>> {
        async move {
            self.check(query_id)?;
            self.statuses.remove(query_id);
            self.queues.remove(query_id);
            self.deleted.lock().push(query_id.to_string());
            Ok(())
        }
        .boxed()
    }

    fn update(&self, status: QueryStatus) -> BoxFuture<'_, Result<(), QueryServiceError>> {
        async move {
            self.check(&status.query_id)?;
            self.statuses.insert(status.query_id.clone(), status);
            Ok(())
        }
        .boxed()
    }
}

impl ResultQueueManager for MemoryQueryStore {
    fn delete_queue<'a>(
        &'a self,
        query_id: &'a str,
    ) -> BoxFuture<'a, Result<(), QueryServiceError>> {
        async move {
            self.check(query_id)?;
            self.queues.remove(query_id);
            self.queues_deleted.lock().push(query_id.to_string());
            Ok(())
        }
        .boxed()
    }
}

/// A call received by [`RecordingQueryManagement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementCall {
    Cancel {
        query_id: String,
        system_initiated: bool,
        metric: QueryMetric,
    },
    PublishNext {
        query_id: String,
        pool_name: String,
    },
}

/// Query management facade that records calls.
#[derive(Default)]
pub struct RecordingQueryManagement {
    calls: Mutex<Vec<ManagementCall>>,
    failing: Mutex<HashSet<String>>,
    linked: Option<(Arc<MemoryQueryStore>, Arc<dyn Clock>)>,
}

impl RecordingQueryManagement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies actions to `store`: a cancel marks the query canceled and a
    /// "next" event records progress at the clock's current time.
    pub fn linked_to(store: Arc<MemoryQueryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            linked: Some((store, clock)),
            ..Self::default()
        }
    }

    /// Makes every call for `query_id` fail.
    pub fn fail_for(&self, query_id: impl Into<String>) {
        self.failing.lock().insert(query_id.into());
    }

    pub fn calls(&self) -> Vec<ManagementCall> {
        self.calls.lock().clone()
    }

    /// Query ids passed to `cancel`, in call order.
    pub fn cancels(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ManagementCall::Cancel { query_id, .. } => Some(query_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(query_id, pool_name)` pairs passed to `publish_next_event`.
    pub fn pokes(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ManagementCall::PublishNext {
                    query_id,
                    pool_name,
                } => Some((query_id.clone(), pool_name.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, query_id: &str, call: ManagementCall) -> Result<(), QueryServiceError> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(query_id) {
            return Err(QueryServiceError::Execution {
                query_id: query_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingQueryManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingQueryManagement")
            .field("calls", &self.calls.lock().len())
            .field("linked", &self.linked.is_some())
            .finish()
    }
}

impl QueryManagement for RecordingQueryManagement {
    fn cancel<'a>(
        &'a self,
        query_id: &'a str,
        system_initiated: bool,
        metric: &'a QueryMetric,
    ) -> BoxFuture<'a, Result<(), QueryServiceError>> {
        async move {
            self.record(
                query_id,
                ManagementCall::Cancel {
                    query_id: query_id.to_string(),
                    system_initiated,
                    metric: metric.clone(),
                },
            )?;
            if let Some((store, _)) = &self.linked {
                store.set_state(query_id, QueryState::Canceled);
            }
            Ok(())
        }
        .boxed()
    }

    fn publish_next_event<'a>(
        &'a self,
        query_id: &'a str,
        pool_name: &'a str,
    ) -> BoxFuture<'a, Result<(), QueryServiceError>> {
        async move {
            self.record(
                query_id,
                ManagementCall::PublishNext {
                    query_id: query_id.to_string(),
                    pool_name: pool_name.to_string(),
                },
            )?;
            if let Some((store, clock)) = &self.linked {
                store.touch_progress(query_id, clock.now_millis());
            }
            Ok(())
        }
        .boxed()
    }
}
