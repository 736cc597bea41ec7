//! In-process lock instance with real expiry semantics

use super::quorum::LockInstance;
use crate::error::{BreakerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    token: String,
    expires_at: Instant,
}

/// A single in-memory key-value instance honouring the quorum-lock contract
///
/// Keys expire physically, set-if-absent and compare-and-delete are atomic
/// (one mutex guards the table), and the instance can be switched
/// unavailable to simulate a partition or crash. Usable both as the N=1
/// backing of an in-process [`QuorumLock`](super::QuorumLock) and as a
/// fault-injection double in tests.
#[derive(Debug)]
pub struct MemoryLockInstance {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl MemoryLockInstance {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the instance going down (`false`) or recovering (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BreakerError::Store("lock instance unavailable".to_string()))
        }
    }
}

impl Default for MemoryLockInstance {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockInstance for MemoryLockInstance {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;

        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        token: token.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        self.check_available()?;

        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.token == token) {
            entries.remove(key);
        }
        Ok(())
    }
}
