//! Per-process critical sections

use super::{DistLock, LockLease};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process lock, one mutex per lock name
///
/// Suitable when a single process owns the state store (pair it with
/// [`MemoryStore`](crate::store::MemoryStore)). Mutexes are created on
/// first use and kept for the life of the lock; the population is bounded
/// by the number of distinct circuit IDs.
#[derive(Debug, Default)]
pub struct LocalLock {
    mutexes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    held: Mutex<HashMap<u64, OwnedMutexGuard<()>>>,
    next_token: AtomicU64,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistLock for LocalLock {
    async fn acquire(&self, name: &str) -> Result<LockLease> {
        let mutex = {
            let mut mutexes = self.mutexes.lock().await;
            mutexes
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = mutex.lock_owned().await;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.held.lock().await.insert(token, guard);

        // Held until released: no lease expiry to account for
        Ok(LockLease::new(token.to_string(), None))
    }

    async fn release(&self, name: &str, lease: LockLease) {
        let Ok(token) = lease.token().parse::<u64>() else {
            tracing::warn!(name, token = lease.token(), "unrecognised local lock token");
            return;
        };
        if self.held.lock().await.remove(&token).is_none() {
            tracing::warn!(name, token, "release of a lease that is not held");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn test_exclusion_for_one_name() {
        let lock = Arc::new(LocalLock::new());
        let inside = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            let overlapped = overlapped.clone();
            handles.push(tokio::spawn(async move {
                let lease = lock.acquire("payments-lock").await.unwrap();
                if inside.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.store(false, Ordering::SeqCst);
                lock.release("payments-lock", lease).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_block() {
        let lock = LocalLock::new();

        let lease_a = lock.acquire("a-lock").await.unwrap();
        // Must not deadlock while a-lock is held
        let lease_b = lock.acquire("b-lock").await.unwrap();

        lock.release("a-lock", lease_a).await;
        lock.release("b-lock", lease_b).await;
    }

    #[tokio::test]
    async fn test_release_allows_reacquisition() {
        let lock = LocalLock::new();

        let lease = lock.acquire("payments-lock").await.unwrap();
        lock.release("payments-lock", lease).await;

        let lease = lock.acquire("payments-lock").await.unwrap();
        lock.release("payments-lock", lease).await;
    }
}
