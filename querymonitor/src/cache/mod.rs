//! Shared record storage and lease locks.
//!
//! The monitor keeps two kinds of fleet-wide state: the singleton monitor
//! status and one executor status record per resource pool. Both live behind
//! the [`RecordStore`] and [`LockService`] contracts and are updated through
//! the same [`locked_update`] helper.

mod locked;
mod memory;
mod r#trait;
mod types;

pub use locked::locked_update;
pub use memory::{MemoryLockService, MemoryRecordStore};
pub use r#trait::{LockService, RecordStore};
pub use types::{CacheError, LeaseToken, LockTiming};
