//! Clock abstraction for timeout evaluation.
//!
//! Timeout policy compares wall-clock epoch milliseconds stored on query
//! records, so the monitor reads "now" through a [`Clock`] instead of calling
//! `SystemTime::now()` directly. Production code uses [`SystemClock`]; tests
//! and the fleet simulation use [`ManualClock`] to move time explicitly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Clock backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Manually driven clock.
///
/// Cloning shares the underlying time, so a test can hand one clone to the
/// scheduler and advance another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock starting at the given epoch milliseconds.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Creates a clock starting at the current system time.
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now_millis())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute value.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Milliseconds elapsed between `since_ms` and `now_ms`, floored at zero.
///
/// Records written by a host whose clock runs slightly ahead can carry
/// timestamps in the future; those count as "just now".
pub fn elapsed_millis(now_ms: i64, since_ms: i64) -> u64 {
    now_ms.saturating_sub(since_ms).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(0);
        let other = clock.clone();
        other.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 250);

        clock.set(10);
        assert_eq!(other.now_millis(), 10);
    }

    #[test]
    fn elapsed_is_never_negative() {
        assert_eq!(elapsed_millis(100, 40), 60);
        assert_eq!(elapsed_millis(100, 100), 0);
        assert_eq!(elapsed_millis(100, 500), 0);
    }
}
