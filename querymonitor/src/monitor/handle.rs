//! Handle to an in-flight sweep.
//!
//! The scheduler keeps at most one [`SweepHandle`]. It polls the handle on
//! each tick without blocking, reaps it once finished, or abandons it once
//! it has been running longer than the monitor interval or lock lease.
//!
//! Abandoning bumps the shared [`SweepGeneration`] and cancels the sweep's
//! token. A sweep checks both before every action and before recording
//! its completion, so an abandoned sweep stops touching shared state even
//! if its task is still alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::MonitorError;
use super::task::SweepReport;

/// Generation number of a launched sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SweepEpoch(u64);

impl SweepEpoch {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SweepEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sweep-{}", self.0)
    }
}

/// The scheduler's current sweep generation, shared with its sweeps.
#[derive(Debug, Clone, Default)]
pub struct SweepGeneration(Arc<AtomicU64>);

impl SweepGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SweepEpoch {
        SweepEpoch(self.0.load(Ordering::SeqCst))
    }

    /// Starts a new generation, invalidating every older epoch.
    pub fn advance(&self) -> SweepEpoch {
        SweepEpoch(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, epoch: SweepEpoch) -> bool {
        self.current() == epoch
    }
}

/// Result of a sweep as seen by the scheduler.
pub type SweepResult = Result<SweepReport, MonitorError>;

/// A launched sweep.
#[derive(Debug)]
pub struct SweepHandle {
    epoch: SweepEpoch,
    started_at: Instant,
    cancel: CancellationToken,
    join: JoinHandle<SweepResult>,
}

impl SweepHandle {
    pub fn new(epoch: SweepEpoch, cancel: CancellationToken, join: JoinHandle<SweepResult>) -> Self {
        Self {
            epoch,
            started_at: Instant::now(),
            cancel,
            join,
        }
    }

    pub fn epoch(&self) -> SweepEpoch {
        self.epoch
    }

    /// Time since launch, on the tokio clock.
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the sweep to stop. Does not wait for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Advances `generation` past this sweep's epoch, cancels the sweep and
    /// lets its task go. Returns the new current epoch.
    ///
    /// The generation moves before the token is cancelled, so the sweep
    /// sees itself abandoned rather than interrupted.
    pub fn abandon(self, generation: &SweepGeneration) -> SweepEpoch {
        let next = generation.advance();
        self.cancel.cancel();
        next
    }

    /// Waits for the sweep's result.
    ///
    /// A panicked task becomes [`MonitorError::TaskPanicked`]; an aborted
    /// one becomes [`MonitorError::Interrupted`].
    pub async fn join(self) -> SweepResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(MonitorError::TaskPanicked(panic_message(e.into_panic()))),
            Err(_) => Err(MonitorError::Interrupted),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
