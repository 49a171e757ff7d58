//! Query status snapshot model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::elapsed_millis;

/// Lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Created,
    Running,
    Closed,
    Canceled,
    Failed,
}

impl QueryState {
    pub fn is_running(&self) -> bool {
        matches!(self, QueryState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Created => "created",
            QueryState::Running => "running",
            QueryState::Closed => "closed",
            QueryState::Canceled => "canceled",
            QueryState::Failed => "failed",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one in-flight query as persisted by the status store.
///
/// Timestamps are epoch milliseconds. `last_used_millis` moves whenever the
/// client touches the query; `last_updated_millis` moves whenever the
/// execution engine reports progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatus {
    pub query_id: String,
    pub query_logic: String,
    /// Resource pool the query executes in.
    pub pool_name: String,
    pub state: QueryState,
    pub last_used_millis: i64,
    pub last_updated_millis: i64,
    /// Preferred connection pool, if the request named one.
    pub connection_pool: Option<String>,
}

impl QueryStatus {
    /// Creates a running query last touched and updated at `now_ms`.
    pub fn new(query_id: impl Into<String>, pool_name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            query_id: query_id.into(),
            query_logic: String::new(),
            pool_name: pool_name.into(),
            state: QueryState::Running,
            last_used_millis: now_ms,
            last_updated_millis: now_ms,
            connection_pool: None,
        }
    }

    pub fn with_logic(mut self, logic: impl Into<String>) -> Self {
        self.query_logic = logic.into();
        self
    }

    pub fn with_state(mut self, state: QueryState) -> Self {
        self.state = state;
        self
    }

    pub fn with_last_used(mut self, millis: i64) -> Self {
        self.last_used_millis = millis;
        self
    }

    pub fn with_last_updated(mut self, millis: i64) -> Self {
        self.last_updated_millis = millis;
        self
    }

    pub fn with_connection_pool(mut self, pool: impl Into<String>) -> Self {
        self.connection_pool = Some(pool.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// No client interaction for at least `ttl_ms`.
    pub fn is_inactive(&self, now_ms: i64, ttl_ms: u64) -> bool {
        elapsed_millis(now_ms, self.last_used_millis) >= ttl_ms
    }

    /// No progress signal for at least `progress_timeout_ms`.
    pub fn is_progress_idle(&self, now_ms: i64, progress_timeout_ms: u64) -> bool {
        elapsed_millis(now_ms, self.last_updated_millis) >= progress_timeout_ms
    }

    /// No client interaction for at least `idle_timeout_ms`.
    pub fn is_user_idle(&self, now_ms: i64, idle_timeout_ms: u64) -> bool {
        elapsed_millis(now_ms, self.last_used_millis) >= idle_timeout_ms
    }

    /// Connection pool to count this query against.
    pub fn connection_pool_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.connection_pool.as_deref().unwrap_or(default)
    }
}
