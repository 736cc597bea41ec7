//! Mutual exclusion for circuit state transitions
//!
//! Every read-modify-write of a circuit record happens inside a critical
//! section held for that circuit's ID. Two implementations are provided:
//!
//! - [`LocalLock`]: per-process mutexes, for single-process deployments
//! - [`QuorumLock`]: Redlock-style quorum locking over N independent
//!   key-value instances, for fleets of cooperating processes
//!
//! Callers do not drive acquire/release themselves; they hand a fallible
//! section to [`run_critical`], which acquires the lock for the ID, awaits
//! the section, releases on every exit path, and propagates the section's
//! result unchanged.

pub mod local;
pub mod memory;
pub mod quorum;

pub use local::LocalLock;
pub use memory::MemoryLockInstance;
pub use quorum::{LockInstance, QuorumLock, QuorumLockConfig};

use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Proof of a held acquisition
///
/// The token makes release idempotent and exclusive: an instance only
/// deletes the lock key if it still holds this acquirer's token.
#[derive(Debug, Clone)]
pub struct LockLease {
    token: String,
    validity: Option<Duration>,
}

impl LockLease {
    /// Build a lease; `validity` is `None` when the lock is held until
    /// released rather than leased for a bounded time
    pub fn new(token: String, validity: Option<Duration>) -> Self {
        Self { token, validity }
    }

    /// The per-acquisition token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Remaining time the lease is honoured, measured at acquisition
    ///
    /// `None` means the lock is held until released (the local lock).
    /// For the quorum lock this is `ttl − elapsed − drift`: work running
    /// past it is no longer protected, and another process may enter the
    /// critical section concurrently. The breaker treats that as
    /// best-effort degradation; callers needing a hard guarantee must cap
    /// their section to this bound themselves.
    pub fn validity(&self) -> Option<Duration> {
        self.validity
    }
}

/// A named critical section shared by every process observing the same
/// lock backend
#[async_trait]
pub trait DistLock: Send + Sync {
    /// Acquire the named lock, blocking through the implementation's retry
    /// budget; fails with `LockUnavailable` when the budget is exhausted
    async fn acquire(&self, name: &str) -> Result<LockLease>;

    /// Release a held lease
    ///
    /// Never fails observably; implementations log per-instance trouble
    /// and move on.
    async fn release(&self, name: &str, lease: LockLease);
}

/// Lock name for a circuit ID
pub(crate) fn lock_name(id: &str) -> String {
    format!("{id}-lock")
}

/// Run `section` while holding the lock for `id`
///
/// The lock is released on every exit path and the section's result is
/// propagated unchanged. An acquisition failure surfaces as
/// `LockUnavailable` without running the section.
pub async fn run_critical<L, T, Fut>(lock: &L, id: &str, section: Fut) -> Result<T>
where
    L: DistLock + ?Sized,
    Fut: Future<Output = Result<T>>,
{
    let name = lock_name(id);
    let lease = lock.acquire(&name).await?;
    let result = section.await;
    lock.release(&name, lease).await;
    result
}
