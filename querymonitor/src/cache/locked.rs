//! Generic locked read-modify-write over a record store.

use tracing::{trace, warn};

use super::r#trait::{LockService, RecordStore};
use super::types::{CacheError, LockTiming};

/// Acquires `lock_name`, applies `mutate` to the record under `key` and
/// stores the result, then releases the lock whatever happened in between.
///
/// `mutate` receives the current record (`None` if absent) and returns the
/// record to store. The stored value is returned.
///
/// # Errors
///
/// [`CacheError::LockTimeout`] if the lock is not granted within
/// `timing.wait`; any error from the record store is passed through after
/// the lock has been released.
pub async fn locked_update<V, F>(
    locks: &dyn LockService,
    records: &dyn RecordStore<V>,
    lock_name: &str,
    key: &str,
    timing: LockTiming,
    mutate: F,
) -> Result<V, CacheError>
where
    V: Clone + Send,
    F: FnOnce(Option<V>) -> V,
{
    let token = locks
        .try_lock(lock_name, timing.wait, timing.lease)
        .await?
        .ok_or_else(|| CacheError::LockTimeout {
            name: lock_name.to_string(),
            waited_ms: timing.wait.as_millis() as u64,
        })?;
    trace!(lock = %token, key, "Locked for update");

    let result = async {
        let current = records.get(key).await?;
        let updated = mutate(current);
        records.put(key, updated.clone()).await?;
        Ok::<_, CacheError>(updated)
    }
    .await;

    if let Err(e) = locks.unlock(&token).await {
        warn!(lock = %token, error = %e, "Failed to release lock after update");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryLockService, MemoryRecordStore};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::time::Duration;

    fn timing() -> LockTiming {
        LockTiming::new(Duration::ZERO, Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn creates_record_when_absent() {
        let locks = MemoryLockService::new();
        let store = MemoryRecordStore::<u32>::new();

        let value = locked_update(&locks, &store, "lock", "key", timing(), |current| {
            assert!(current.is_none());
            1
        })
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert_eq!(store.snapshot("key"), Some(1));
        assert!(!locks.is_locked("lock"));
    }

    #[tokio::test(start_paused = true)]
    async fn mutates_existing_record() {
        let locks = MemoryLockService::new();
        let store = MemoryRecordStore::<u32>::new();
        store.put("key", 41).await.unwrap();

        let value = locked_update(&locks, &store, "lock", "key", timing(), |current| {
            current.unwrap_or(0) + 1
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_lock_held() {
        let locks = MemoryLockService::new();
        let store = MemoryRecordStore::<u32>::new();
        locks
            .try_lock("lock", Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();

        let err = locked_update(&locks, &store, "lock", "key", timing(), |_| 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { ref name, .. } if name == "lock"));
        assert!(store.is_empty());
    }

    struct FailingStore;

    impl RecordStore<u32> for FailingStore {
        fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<u32>, CacheError>> {
            async { Err(CacheError::Unavailable("down".to_string())) }.boxed()
        }

        fn put<'a>(&'a self, _key: &'a str, _value: u32) -> BoxFuture<'a, Result<(), CacheError>> {
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn releases_lock_when_store_fails() {
        let locks = MemoryLockService::new();

        let err = locked_update(&locks, &FailingStore, "lock", "key", timing(), |_| 1)
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::Unavailable("down".to_string()));
        assert!(!locks.is_locked("lock"));
    }
}
