//! Per-key mutual exclusion with FIFO fairness and deadlock-free
//! multi-key acquisition.
//!
//! At most one critical section runs per key at a time; waiters queue
//! in arrival order (`tokio::sync::Mutex`'s internal semaphore grants
//! permits FIFO). `with_locks` sorts keys by their `Ord` impl before
//! acquisition so that any two-party operation (e.g. a transfer between
//! two users) always acquires shared keys in the same total order,
//! which rules out the classic two-lock deadlock.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash as StdHash;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// Returned when a queued lock acquisition is cancelled before it was
/// granted. The caller observes `Cancelled`; no critical section ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lock acquisition cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// A keyed set of FIFO mutexes. The manager itself never holds a
/// process-wide lock while a caller's critical section runs — the
/// bookkeeping map is only touched to fetch or create the per-key
/// `Arc<Mutex<()>>` handle, a synchronous, non-suspending operation.
pub struct KeyedLockManager<K> {
    locks: StdMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLockManager<K>
where
    K: Eq + StdHash + Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLockManager<K>
where
    K: Eq + StdHash + Ord + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn handle(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().expect("lock map poisoned");
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the map entry for `key` if nothing else references it,
    /// keeping the bookkeeping map bounded by the number of currently
    /// (or recently) contended keys rather than growing forever.
    fn maybe_gc(&self, key: &K, handle: &Arc<AsyncMutex<()>>) {
        // strong_count == 2: one held by this function's `handle`
        // argument, one in the map. If nothing else is waiting, it is
        // safe to remove.
        if Arc::strong_count(handle) <= 2 {
            let mut map = self.locks.lock().expect("lock map poisoned");
            if let Some(entry) = map.get(key) {
                if Arc::strong_count(entry) <= 2 {
                    map.remove(key);
                }
            }
        }
    }

    /// Runs `f` while holding the lock for `key`. Cooperative
    /// cancellation: if `cancel` fires while still queued, the slot is
    /// released to the next waiter and `Cancelled` is returned without
    /// running `f`.
    pub async fn with_lock_cancellable<F, Fut, T>(
        &self,
        key: K,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, Cancelled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.handle(&key);
        let guard = tokio::select! {
            g = handle.lock() => g,
            _ = cancel.cancelled() => return Err(Cancelled),
        };
        let result = f().await;
        drop(guard);
        self.maybe_gc(&key, &handle);
        Ok(result)
    }

    /// `with_lock` without a cancellation token — the per-key wait has
    /// no timeout by default, matching §4.1.
    pub async fn with_lock<F, Fut, T>(&self, key: K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_lock_cancellable(key, &CancellationToken::new(), f)
            .await
            .expect("fresh cancellation token is never triggered")
    }

    /// Acquires every key in `keys`, sorted and de-duplicated into a
    /// stable total order before acquisition, then runs `f`. Keys are
    /// released in reverse acquisition order.
    pub async fn with_locks_cancellable<F, Fut, T>(
        &self,
        mut keys: Vec<K>,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, Cancelled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        keys.sort();
        keys.dedup();
        let handles: Vec<_> = keys.iter().map(|k| self.handle(k)).collect();
        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            let guard = tokio::select! {
                g = handle.lock() => g,
                _ = cancel.cancelled() => return Err(Cancelled),
            };
            guards.push(guard);
        }
        let result = f().await;
        drop(guards);
        for (key, handle) in keys.iter().zip(handles.iter()) {
            self.maybe_gc(key, handle);
        }
        Ok(result)
    }

    pub async fn with_locks<F, Fut, T>(&self, keys: Vec<K>, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_locks_cancellable(keys, &CancellationToken::new(), f)
            .await
            .expect("fresh cancellation token is never triggered")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_operations_on_the_same_key() {
        let manager: Arc<KeyedLockManager<&'static str>> = Arc::new(KeyedLockManager::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .with_lock("user-a", || async {
                        let before = counter.load(Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        counter.store(before + 1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn with_locks_acquires_in_sorted_order_avoiding_deadlock() {
        let manager = Arc::new(KeyedLockManager::new());
        let m1 = manager.clone();
        let m2 = manager.clone();
        let t1 = tokio::spawn(async move {
            m1.with_locks(vec!["b", "a"], || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
            })
            .await;
        });
        let t2 = tokio::spawn(async move {
            m2.with_locks(vec!["a", "b"], || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
            })
            .await;
        });
        tokio::time::timeout(Duration::from_secs(2), async {
            t1.await.unwrap();
            t2.await.unwrap();
        })
        .await
        .expect("both transfers complete without deadlocking");
    }

    #[tokio::test]
    async fn cancellation_releases_the_slot_without_running_the_body() {
        let manager = Arc::new(KeyedLockManager::new());
        let holder_cancel = CancellationToken::new();
        let manager_clone = manager.clone();
        let holder = tokio::spawn(async move {
            manager_clone
                .with_lock_cancellable("key", &holder_cancel, || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let waiter_cancel = CancellationToken::new();
        waiter_cancel.cancel();
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = ran.clone();
        let result = manager
            .with_lock_cancellable("key", &waiter_cancel, || async move {
                ran_clone.store(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(result, Err(Cancelled));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        holder.await.unwrap().unwrap();
    }
}
