//! State store contract and the in-memory implementation
//!
//! The store replicates one [`Circuit`] record per circuit ID between every
//! cooperating process. The contract is deliberately small: get and set,
//! with a missing key reported as `None` rather than an error. No
//! compare-and-set semantics are required; mutual exclusion per ID is
//! provided by the [`lock`](crate::lock) module, and records are only
//! mutated inside a held critical section.
//!
//! Retention is the store's concern: an implementation may expire records,
//! and the breaker treats a missing record as freshly initialised. Remote
//! implementations conventionally serialise the record as JSON (see
//! [`Circuit`]'s serde encoding) under the circuit ID as the key.

use crate::circuit::Circuit;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Shared storage for circuit records, keyed by circuit ID
///
/// Implementations must be safe to call from inside a held critical
/// section, which in practice means they must not themselves take the
/// circuit's lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the record for `id`; `Ok(None)` when the key is absent
    async fn get(&self, id: &str) -> Result<Option<Circuit>>;

    /// Persist the record for `id`
    async fn set(&self, id: &str, circuit: &Circuit) -> Result<()>;
}

/// Process-local store backed by a hash map
///
/// Suitable for single-process deployments and tests. Records never expire.
#[derive(Debug, Default)]
pub struct MemoryStore {
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Circuit>> {
        Ok(self.circuits.lock().await.get(id).cloned())
    }

    async fn set(&self, id: &str, circuit: &Circuit) -> Result<()> {
        self.circuits
            .lock()
            .await
            .insert(id.to_string(), circuit.clone());
        Ok(())
    }
}
