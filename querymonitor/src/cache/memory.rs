//! In-process implementations of the cache contracts.
//!
//! [`MemoryRecordStore`] and [`MemoryLockService`] give the monitor a
//! working "cluster" inside one process. Several schedulers sharing the same
//! `Arc`s behave like several instances sharing one distributed cache, which
//! is how the fleet simulation and the integration tests run.
//!
//! Lease expiry is measured on the tokio clock, so tests can pause and
//! advance time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::r#trait::{LockService, RecordStore};
use super::types::{CacheError, LeaseToken};

/// Record store backed by a concurrent map.
#[derive(Debug)]
pub struct MemoryRecordStore<V> {
    records: DashMap<String, V>,
}

impl<V: Clone + Send + Sync> MemoryRecordStore<V> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Synchronous read, for inspection.
    pub fn snapshot(&self, key: &str) -> Option<V> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }
}

impl<V: Clone + Send + Sync> Default for MemoryRecordStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> RecordStore<V> for MemoryRecordStore<V> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<V>, CacheError>> {
        let value = self.snapshot(key);
        async move { Ok(value) }.boxed()
    }

    fn put<'a>(&'a self, key: &'a str, value: V) -> BoxFuture<'a, Result<(), CacheError>> {
        self.records.insert(key.to_string(), value);
        async { Ok(()) }.boxed()
    }
}

/// A granted lock.
#[derive(Debug, Clone, Copy)]
struct Grant {
    sequence: u64,
    expires_at: Instant,
}

/// Lease lock service held in process memory.
#[derive(Debug)]
pub struct MemoryLockService {
    grants: Mutex<HashMap<String, Grant>>,
    next_sequence: AtomicU64,
    released: Notify,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(1),
            released: Notify::new(),
        }
    }

    /// Returns true if `name` is currently held under an unexpired lease.
    pub fn is_locked(&self, name: &str) -> bool {
        let now = Instant::now();
        self.grants
            .lock()
            .get(name)
            .is_some_and(|g| g.expires_at > now)
    }

    /// Grants the lock if it is free or its lease has run out.
    fn acquire_now(&self, name: &str, lease: Duration) -> Option<LeaseToken> {
        let now = Instant::now();
        let mut grants = self.grants.lock();

        if let Some(grant) = grants.get(name) {
            if grant.expires_at > now {
                return None;
            }
            trace!(lock = name, sequence = grant.sequence, "Lease expired, reclaiming lock");
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        grants.insert(
            name.to_string(),
            Grant {
                sequence,
                expires_at: now + lease,
            },
        );
        Some(LeaseToken::new(name, sequence))
    }

    fn expiry_of(&self, name: &str) -> Option<Instant> {
        self.grants.lock().get(name).map(|g| g.expires_at)
    }

    async fn acquire(&self, name: &str, wait: Duration, lease: Duration) -> Option<LeaseToken> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for release notifications before checking, so a
            // release between the check and the wait is not missed.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(token) = self.acquire_now(name, lease) {
                return Some(token);
            }
            if Instant::now() >= deadline {
                return None;
            }

            let wake_at = self
                .expiry_of(name)
                .map_or(deadline, |expiry| expiry.min(deadline));
            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

impl Default for MemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

impl LockService for MemoryLockService {
    fn try_lock<'a>(
        &'a self,
        name: &'a str,
        wait: Duration,
        lease: Duration,
    ) -> BoxFuture<'a, Result<Option<LeaseToken>, CacheError>> {
        async move { Ok(self.acquire(name, wait, lease).await) }.boxed()
    }

    fn unlock<'a>(&'a self, token: &'a LeaseToken) -> BoxFuture<'a, Result<bool, CacheError>> {
        let released = {
            let mut grants = self.grants.lock();
            match grants.get(token.name()) {
                Some(grant) if grant.sequence == token.sequence() => {
                    grants.remove(token.name());
                    true
                }
                _ => false,
            }
        };
        if released {
            self.released.notify_waiters();
        } else {
            trace!(token = %token, "Unlock ignored, token no longer owns the lock");
        }
        async move { Ok(released) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn record_store_get_put() {
        let store = MemoryRecordStore::<u32>::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.put("a", 5).await.unwrap();
        store.put("a", 6).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(6));
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_try_lock_fails_fast() {
        let locks = MemoryLockService::new();

        let first = locks.try_lock("m", Duration::ZERO, LEASE).await.unwrap();
        assert!(first.is_some());
        let second = locks.try_lock("m", Duration::ZERO, LEASE).await.unwrap();
        assert!(second.is_none());
        assert!(locks.is_locked("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn different_names_do_not_contend() {
        let locks = MemoryLockService::new();
        assert!(locks.try_lock("a", Duration::ZERO, LEASE).await.unwrap().is_some());
        assert!(locks.try_lock("b", Duration::ZERO, LEASE).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_without_unlock() {
        let locks = MemoryLockService::new();
        let first = locks
            .try_lock("m", Duration::ZERO, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!locks.is_locked("m"));

        let second = locks
            .try_lock("m", Duration::ZERO, LEASE)
            .await
            .unwrap()
            .unwrap();
        assert!(second.sequence() > first.sequence());

        // Stale token must not release the new holder's lock
        assert!(!locks.unlock(&first).await.unwrap());
        assert!(locks.is_locked("m"));
        assert!(locks.unlock(&second).await.unwrap());
        assert!(!locks.is_locked("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_twice_is_noop() {
        let locks = MemoryLockService::new();
        let token = locks
            .try_lock("m", Duration::ZERO, LEASE)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.unlock(&token).await.unwrap());
        assert!(!locks.unlock(&token).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_acquires_after_release() {
        let locks = Arc::new(MemoryLockService::new());
        let token = locks
            .try_lock("m", Duration::ZERO, LEASE)
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .try_lock("m", Duration::from_secs(10), LEASE)
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        locks.unlock(&token).await.unwrap();

        let acquired = waiter.await.unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_acquires_when_lease_expires() {
        let locks = Arc::new(MemoryLockService::new());
        locks
            .try_lock("m", Duration::ZERO, Duration::from_secs(3))
            .await
            .unwrap()
            .unwrap();

        let start = Instant::now();
        let acquired = locks
            .try_lock("m", Duration::from_secs(10), LEASE)
            .await
            .unwrap();
        assert!(acquired.is_some());
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gives_up_at_deadline() {
        let locks = MemoryLockService::new();
        locks.try_lock("m", Duration::ZERO, LEASE).await.unwrap();

        let start = Instant::now();
        let acquired = locks
            .try_lock("m", Duration::from_secs(2), LEASE)
            .await
            .unwrap();
        assert!(acquired.is_none());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
