//! Per-call query metrics for monitor-initiated actions.
//!
//! Requests arriving through the service carry their own metrics record.
//! The monitor runs off any request, so before it cancels a query it builds
//! a fresh [`QueryMetric`] with a [`MetricsFactory`], attaches it to a
//! [`MetricsContext`] for the duration of the call and detaches it again
//! when the returned [`MetricsScope`] is dropped.
//!
//! ```
//! use querymonitor::metrics::{MetricsContext, MetricsFactory, MonitorMetricsFactory};
//!
//! let context = MetricsContext::new();
//! let metric = MonitorMetricsFactory.create_metric("q-1", 1_000);
//! {
//!     let scope = context.attach(metric);
//!     assert_eq!(scope.metric().query_id, "q-1");
//!     assert!(context.current("q-1").is_some());
//! }
//! assert!(context.current("q-1").is_none());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Who started the call a metric describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOrigin {
    /// A client request.
    Request,
    /// The query monitor.
    Monitor,
}

/// Metrics record for one call against a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMetric {
    pub query_id: String,
    /// Epoch milliseconds the record was created.
    pub created_millis: i64,
    pub origin: MetricOrigin,
}

impl QueryMetric {
    pub fn new(query_id: impl Into<String>, created_millis: i64, origin: MetricOrigin) -> Self {
        Self {
            query_id: query_id.into(),
            created_millis,
            origin,
        }
    }

    /// True if the call was started by the system rather than a client.
    pub fn is_system_initiated(&self) -> bool {
        self.origin == MetricOrigin::Monitor
    }
}

/// Creates metrics records for calls made outside a request.
pub trait MetricsFactory: Send + Sync {
    fn create_metric(&self, query_id: &str, now_ms: i64) -> QueryMetric;
}

/// Factory producing [`MetricOrigin::Monitor`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorMetricsFactory;

impl MetricsFactory for MonitorMetricsFactory {
    fn create_metric(&self, query_id: &str, now_ms: i64) -> QueryMetric {
        QueryMetric::new(query_id, now_ms, MetricOrigin::Monitor)
    }
}

/// Metrics records currently attached, keyed by query id.
#[derive(Debug, Default)]
pub struct MetricsContext {
    attached: DashMap<String, QueryMetric>,
    total_attached: AtomicU64,
}

impl MetricsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `metric` until the returned scope is dropped.
    ///
    /// A record already attached for the same query is replaced and is not
    /// restored when this scope ends.
    pub fn attach(&self, metric: QueryMetric) -> MetricsScope<'_> {
        self.attached.insert(metric.query_id.clone(), metric.clone());
        self.total_attached.fetch_add(1, Ordering::Relaxed);
        MetricsScope {
            context: self,
            metric,
        }
    }

    /// The record attached for `query_id`, if any.
    pub fn current(&self, query_id: &str) -> Option<QueryMetric> {
        self.attached.get(query_id).map(|m| m.value().clone())
    }

    /// Number of records attached right now.
    pub fn active_count(&self) -> usize {
        self.attached.len()
    }

    /// Number of records ever attached.
    pub fn total_attached(&self) -> u64 {
        self.total_attached.load(Ordering::Relaxed)
    }

    fn detach(&self, metric: &QueryMetric) {
        self.attached
            .remove_if(&metric.query_id, |_, current| current == metric);
    }
}

/// Guard that keeps a metrics record attached.
#[derive(Debug)]
pub struct MetricsScope<'a> {
    context: &'a MetricsContext,
    metric: QueryMetric,
}

impl MetricsScope<'_> {
    pub fn metric(&self) -> &QueryMetric {
        &self.metric
    }
}

impl Drop for MetricsScope<'_> {
    fn drop(&mut self) {
        self.context.detach(&self.metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_factory_marks_system_origin() {
        let metric = MonitorMetricsFactory.create_metric("q", 42);
        assert_eq!(metric.created_millis, 42);
        assert!(metric.is_system_initiated());
        assert!(!QueryMetric::new("q", 0, MetricOrigin::Request).is_system_initiated());
    }

    #[test]
    fn scope_detaches_on_drop() {
        let context = MetricsContext::new();
        let scope = context.attach(MonitorMetricsFactory.create_metric("q", 1));
        assert_eq!(context.active_count(), 1);
        drop(scope);
        assert_eq!(context.active_count(), 0);
        assert_eq!(context.total_attached(), 1);
    }

    #[test]
    fn scope_detaches_on_panic() {
        let context = MetricsContext::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = context.attach(MonitorMetricsFactory.create_metric("q", 1));
            panic!("cancel blew up");
        }));
        assert!(result.is_err());
        assert!(context.current("q").is_none());
    }

    #[test]
    fn newer_attachment_survives_older_detach() {
        let context = MetricsContext::new();
        let older = context.attach(MonitorMetricsFactory.create_metric("q", 1));
        let newer = context.attach(MonitorMetricsFactory.create_metric("q", 2));

        drop(older);
        assert_eq!(context.current("q").map(|m| m.created_millis), Some(2));
        drop(newer);
        assert!(context.current("q").is_none());
    }
}
