//! Breakwater: a distributed circuit breaker
//!
//! # Overview
//!
//! A circuit breaker wraps a fallible operation and decides, per request,
//! whether to execute it, refuse it, or probe it for recovery. Breakwater
//! makes that decision *distributed*: every process observing the same
//! circuit ID through a shared state store converges on the same breaker
//! state, so once one caller declares a dependency unhealthy, every caller
//! stops hammering it until the grace period has elapsed.
//!
//! Three pieces cooperate:
//!
//! - the **state machine** over the replicated [`Circuit`] record
//!   (closed → open → half-open, plus manual isolation);
//! - the **execution pipeline**: per-attempt timeout, bounded retries,
//!   pluggable backoff, panic containment;
//! - the **quorum lock**: Redlock-style mutual exclusion over N
//!   independent key-value instances, serialising state transitions for a
//!   circuit ID across processes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Your Application             │
//! └─────────────┬───────────────────────────┘
//!               │ fire(id, op)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │          CircuitBreaker                 │  ← decide / commit under the
//! │  (state machine over the Circuit record)│    circuit's critical section
//! └──────┬───────────────────────┬──────────┘
//!        │                       │
//!        ▼                       ▼
//! ┌──────────────┐        ┌──────────────────┐
//! │  StateStore  │        │  DistLock        │  ← LocalLock or QuorumLock
//! │  (shared)    │        │  (shared)        │    over N instances
//! └──────────────┘        └──────────────────┘
//!        │
//!        ▼
//! ┌─────────────────────────────────────────┐
//! │       Execution pipeline                │  ← timeout, retries, backoff
//! │  (runs the operation outside the lock)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The store and lock are trait seams: pair [`MemoryStore`] with
//! [`LocalLock`] for a single process, or implement
//! [`StateStore`](store::StateStore) and
//! [`LockInstance`](lock::LockInstance) over your key-value fleet for the
//! distributed deployment.
//!
//! # Usage
//!
//! ```
//! use breakwater::{BreakerConfig, BreakerError, CircuitBreaker};
//! use breakwater::backoff::{self, Fixed};
//! use breakwater::lock::LocalLock;
//! use breakwater::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), BreakerError> {
//! let breaker = CircuitBreaker::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(LocalLock::new()),
//!     BreakerConfig {
//!         threshold: 3,
//!         grace_period: Duration::from_secs(1),
//!         backoff: backoff::shared(Fixed::new(Duration::from_millis(50))),
//!         ..Default::default()
//!     },
//! )?;
//!
//! breaker.on_open(|event| println!("circuit {} tripped", event.circuit_id));
//!
//! let value = breaker
//!     .fire("payments", || async {
//!         // your fallible call here
//!         Ok::<_, BreakerError>(42)
//!     })
//!     .await?;
//! assert_eq!(value, 42);
//!
//! breaker.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod breaker;
pub mod circuit;
pub mod error;
pub mod events;
pub mod lock;
pub mod store;

mod executor;

// Re-export main types for convenience
pub use backoff::{Backoff, Exponential, Fixed, SharedBackoff};
pub use breaker::{BreakerConfig, CircuitBreaker, FailPredicate, WrappedBreaker};
pub use circuit::{Circuit, CircuitState};
pub use error::{BreakerError, Result};
pub use events::{CircuitEvent, EventKind};
pub use lock::{DistLock, LocalLock, LockLease, MemoryLockInstance, QuorumLock, QuorumLockConfig};
pub use store::{MemoryStore, StateStore};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use breakwater::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::{Backoff, Exponential, Fixed};
    pub use super::breaker::{BreakerConfig, CircuitBreaker, WrappedBreaker};
    pub use super::circuit::{Circuit, CircuitState};
    pub use super::error::BreakerError;
    pub use super::events::{CircuitEvent, EventKind};
    pub use super::lock::{DistLock, LocalLock, QuorumLock};
    pub use super::store::{MemoryStore, StateStore};
}
