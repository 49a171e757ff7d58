//! Contracts for the query service collaborators the monitor acts through.
//!
//! The monitor never mutates a [`QueryStatus`] itself. Everything it does
//! to a query goes through one of these traits:
//!
//! - [`QueryStatusStore`]: persisted query state
//! - [`ResultQueueManager`]: per-query result transport
//! - [`QueryManagement`]: cancel and "next" events on live executions

use futures::future::BoxFuture;
use thiserror::Error;

use super::status::QueryStatus;
use crate::metrics::QueryMetric;

/// Errors from query service collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryServiceError {
    #[error("Query not found: {0}")]
    NotFound(String),

    #[error("Execution error for query {query_id}: {reason}")]
    Execution { query_id: String, reason: String },

    #[error("Query storage unavailable: {0}")]
    Storage(String),
}

/// Persisted status of all in-flight queries.
pub trait QueryStatusStore: Send + Sync {
    /// Returns a snapshot of every query status.
    fn list_all(&self) -> BoxFuture<'_, Result<Vec<QueryStatus>, QueryServiceError>>;

    /// Removes all persisted state for a query: status, task state and
    /// pending work.
    fn delete<'a>(&'a self, query_id: &'a str) -> BoxFuture<'a, Result<(), QueryServiceError>>;

    /// Stores `status`, replacing the previous record for its query.
    fn update(&self, status: QueryStatus) -> BoxFuture<'_, Result<(), QueryServiceError>>;
}

/// Result transport for queries.
pub trait ResultQueueManager: Send + Sync {
    /// Removes the result queue of `query_id`. Succeeds if it is already gone.
    fn delete_queue<'a>(&'a self, query_id: &'a str)
        -> BoxFuture<'a, Result<(), QueryServiceError>>;
}

/// Control surface over live query executions.
pub trait QueryManagement: Send + Sync {
    /// Cancels a query. `metric` describes this call and stays attached
    /// until the call returns.
    fn cancel<'a>(
        &'a self,
        query_id: &'a str,
        system_initiated: bool,
        metric: &'a QueryMetric,
    ) -> BoxFuture<'a, Result<(), QueryServiceError>>;

    /// Asks the execution engine to continue a stalled query.
    fn publish_next_event<'a>(
        &'a self,
        query_id: &'a str,
        pool_name: &'a str,
    ) -> BoxFuture<'a, Result<(), QueryServiceError>>;
}
