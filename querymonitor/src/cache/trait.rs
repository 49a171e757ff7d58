//! Cache and lock service traits for dependency injection.
//!
//! The monitor never talks to a concrete cluster cache. It depends on two
//! small contracts:
//!
//! - [`RecordStore`]: keyed get/put of one record type
//! - [`LockService`]: named lease locks that expire on their own
//!
//! Both return boxed futures so they can be used as trait objects
//! (`Arc<dyn LockService>`), letting one scheduler hold collaborators of
//! different concrete types.

use std::time::Duration;

use futures::future::BoxFuture;

use super::types::{CacheError, LeaseToken};

/// Keyed storage for records of type `V`.
///
/// Reads are lock-free and may be slightly stale; callers that need
/// read-modify-write consistency take a lock first (see
/// [`locked_update`](super::locked_update)).
pub trait RecordStore<V>: Send + Sync {
    /// Returns the record stored under `key`, if any.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<V>, CacheError>>;

    /// Stores `value` under `key`, replacing any previous record.
    fn put<'a>(&'a self, key: &'a str, value: V) -> BoxFuture<'a, Result<(), CacheError>>;
}

/// Named mutual-exclusion locks with a lease.
///
/// A granted lock frees itself after its lease even if never released, so
/// a holder that crashes cannot block the fleet forever.
pub trait LockService: Send + Sync {
    /// Attempts to acquire `name`, waiting up to `wait`.
    ///
    /// Returns `Ok(None)` if the lock is still held by someone else when
    /// the wait runs out. A zero `wait` makes exactly one attempt.
    fn try_lock<'a>(
        &'a self,
        name: &'a str,
        wait: Duration,
        lease: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseToken>, CacheError>>;

    /// Releases the lock identified by `token`.
    ///
    /// Returns `Ok(false)` without doing anything if the token no longer
    /// owns the lock (its lease expired, possibly followed by a new grant).
    fn unlock<'a>(&'a self, token: &'a LeaseToken) -> BoxFuture<'a, Result<bool, CacheError>>;
}
