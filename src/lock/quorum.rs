//! Redlock-style quorum locking
//!
//! A lock is held when a majority of N independent key-value instances
//! granted a set-if-absent of the lock key to a per-acquisition token, and
//! the time spent acquiring (plus a clock-drift allowance) still leaves a
//! positive slice of the key's physical expiry. Failing that, the attempt
//! is rolled back everywhere and retried after a delay, up to a bounded
//! budget.
//!
//! The instance contract is two operations that must be atomic at the
//! instance: on a Redis-like backend, `SET key token NX PX ttl` and a
//! compare-and-delete script:
//!
//! ```text
//! if redis.call("get", KEYS[1]) == ARGV[1] then
//!     return redis.call("del", KEYS[1])
//! else
//!     return 0
//! end
//! ```
//!
//! [`MemoryLockInstance`](crate::lock::memory::MemoryLockInstance) provides
//! the same semantics in-process.

use super::{DistLock, LockLease};
use crate::error::{BreakerError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// One key-value instance participating in the quorum
///
/// Both operations must be atomic at the instance. A transport failure is
/// reported as an error and counts the same as a refused grant.
#[async_trait]
pub trait LockInstance: Send + Sync {
    /// Set `key = token` with physical expiry `ttl`, only if the key is
    /// absent; `Ok(true)` when the grant succeeded
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its current value equals `token`
    async fn release(&self, key: &str, token: &str) -> Result<()>;
}

/// Tuning for [`QuorumLock`]
#[derive(Debug, Clone)]
pub struct QuorumLockConfig {
    /// Acquisition rounds before giving up
    pub retry_count: u32,

    /// Pause between acquisition rounds
    pub retry_delay: Duration,

    /// Clock-drift allowance as a fraction of the TTL
    pub drift_factor: f64,

    /// Physical expiry of the lock key on each instance
    pub ttl: Duration,
}

impl Default for QuorumLockConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_millis(300),
            drift_factor: 0.01,
            ttl: Duration::from_millis(500),
        }
    }
}

/// Distributed lock over N independent instances
///
/// # Example
///
/// ```
/// use breakwater::lock::{DistLock, MemoryLockInstance, QuorumLock, QuorumLockConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let instances: Vec<Arc<dyn breakwater::lock::LockInstance>> = (0..3)
///     .map(|_| Arc::new(MemoryLockInstance::new()) as _)
///     .collect();
/// let lock = QuorumLock::new(instances, QuorumLockConfig::default());
///
/// let lease = lock.acquire("payments-lock").await.unwrap();
/// // ... critical section, ideally bounded by lease.validity() ...
/// lock.release("payments-lock", lease).await;
/// # }
/// ```
pub struct QuorumLock {
    instances: Vec<Arc<dyn LockInstance>>,
    config: QuorumLockConfig,
}

impl QuorumLock {
    pub fn new(instances: Vec<Arc<dyn LockInstance>>, config: QuorumLockConfig) -> Self {
        Self { instances, config }
    }

    /// Number of grants required for a majority
    fn quorum(&self) -> usize {
        self.instances.len() / 2 + 1
    }

    /// Best-effort rollback of one acquisition round on every instance
    async fn release_everywhere(&self, key: &str, token: &str) {
        let attempts = self
            .instances
            .iter()
            .map(|instance| instance.release(key, token));
        for outcome in join_all(attempts).await {
            if let Err(err) = outcome {
                warn!(key, error = %err, "could not release lock on instance");
            }
        }
    }
}

#[async_trait]
impl DistLock for QuorumLock {
    async fn acquire(&self, name: &str) -> Result<LockLease> {
        let ttl = self.config.ttl;
        let drift = Duration::from_millis(
            (ttl.as_millis() as f64 * self.config.drift_factor) as u64 + 2,
        );

        for round in 0..self.config.retry_count {
            let token = new_token();
            let started = Instant::now();

            let grants = join_all(
                self.instances
                    .iter()
                    .map(|instance| instance.try_acquire(name, &token, ttl)),
            )
            .await;
            let granted = grants
                .iter()
                .filter(|grant| matches!(grant, Ok(true)))
                .count();

            let validity = ttl.saturating_sub(started.elapsed()).saturating_sub(drift);

            if granted >= self.quorum() && !validity.is_zero() {
                debug!(name, granted, round, validity_ms = validity.as_millis() as u64, "lock acquired");
                return Ok(LockLease::new(token, Some(validity)));
            }

            // Partial grants would starve other acquirers until the TTL
            // expires; roll them back before the next round.
            self.release_everywhere(name, &token).await;

            if round + 1 < self.config.retry_count {
                sleep(self.config.retry_delay).await;
            }
        }

        Err(BreakerError::LockUnavailable {
            name: name.to_string(),
        })
    }

    async fn release(&self, name: &str, lease: LockLease) {
        self.release_everywhere(name, lease.token()).await;
    }
}

/// Per-acquisition token: 128 bits of randomness, hex encoded
fn new_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::memory::MemoryLockInstance;

    fn instances(n: usize) -> Vec<Arc<MemoryLockInstance>> {
        (0..n).map(|_| Arc::new(MemoryLockInstance::new())).collect()
    }

    fn quorum_lock(instances: &[Arc<MemoryLockInstance>], config: QuorumLockConfig) -> QuorumLock {
        QuorumLock::new(
            instances
                .iter()
                .map(|i| i.clone() as Arc<dyn LockInstance>)
                .collect(),
            config,
        )
    }

    #[test]
    fn test_token_shape() {
        let token = new_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, new_token());
    }

    #[tokio::test]
    async fn test_acquire_with_all_instances_healthy() {
        let nodes = instances(3);
        let lock = quorum_lock(&nodes, QuorumLockConfig::default());

        let lease = lock.acquire("payments-lock").await.unwrap();
        let validity = lease.validity().unwrap();
        assert!(validity > Duration::ZERO);
        assert!(validity < Duration::from_millis(500));

        lock.release("payments-lock", lease).await;
    }

    #[tokio::test]
    async fn test_contended_key_denied_until_released() {
        let nodes = instances(3);
        let lock = quorum_lock(
            &nodes,
            QuorumLockConfig {
                retry_count: 1,
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let lease = lock.acquire("payments-lock").await.unwrap();

        // Second acquirer cannot reach quorum while the key is held
        let denied = lock.acquire("payments-lock").await;
        assert!(matches!(
            denied,
            Err(BreakerError::LockUnavailable { .. })
        ));

        lock.release("payments-lock", lease).await;
        let lease = lock.acquire("payments-lock").await.unwrap();
        lock.release("payments-lock", lease).await;
    }

    #[tokio::test]
    async fn test_release_is_token_exclusive() {
        let nodes = instances(1);

        nodes[0]
            .try_acquire("payments-lock", "someone-else", Duration::from_secs(5))
            .await
            .unwrap();

        // Releasing with the wrong token must leave the key in place
        nodes[0]
            .release("payments-lock", "not-the-holder")
            .await
            .unwrap();
        assert!(!nodes[0]
            .try_acquire("payments-lock", "third", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_minority_failures_tolerated() {
        let nodes = instances(5);
        nodes[0].set_available(false);
        nodes[1].set_available(false);

        let lock = quorum_lock(&nodes, QuorumLockConfig::default());
        let lease = lock.acquire("payments-lock").await.unwrap();
        lock.release("payments-lock", lease).await;
    }

    #[tokio::test]
    async fn test_majority_failures_exhaust_budget() {
        let nodes = instances(5);
        for node in nodes.iter().take(3) {
            node.set_available(false);
        }

        let config = QuorumLockConfig {
            retry_count: 2,
            retry_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let lock = quorum_lock(&nodes, config);

        let started = Instant::now();
        let denied = lock.acquire("payments-lock").await;
        assert!(matches!(
            denied,
            Err(BreakerError::LockUnavailable { .. })
        ));
        // Bounded by retry_count * (ttl + retry_delay)
        assert!(started.elapsed() < Duration::from_millis(2 * (500 + 20) + 200));
    }
}
