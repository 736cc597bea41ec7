//! Error types for the breaker and its collaborators

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, BreakerError>;

/// Errors surfaced by the breaker, the state store, and the distributed lock
#[derive(Debug, Error, Clone)]
pub enum BreakerError {
    /// Invalid configuration, rejected at construction time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The state store failed a get or set
    #[error("state store failure: {0}")]
    Store(String),

    /// Quorum could not be reached within the lock's retry budget
    #[error("failed to acquire lock {name}")]
    LockUnavailable { name: String },

    /// Short-circuit: the circuit is open (or isolated) for this ID
    #[error("circuit open for {id}")]
    CircuitOpen { id: String },

    /// A single attempt exceeded its per-attempt timeout
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The wrapped operation returned an error
    #[error("operation failed: {0}")]
    Operation(String),

    /// The wrapped operation panicked
    #[error("operation panicked: {0}")]
    Panic(String),

    /// The breaker has been destroyed; no further fires are accepted
    #[error("breaker has been destroyed")]
    Destroyed,
}

impl BreakerError {
    /// True when the error means the request was refused without running
    /// the operation
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }

    /// True when the error is a per-attempt timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout(_))
    }

    /// True when the error came from the coordination substrate rather than
    /// the wrapped operation
    pub fn is_coordination_failure(&self) -> bool {
        matches!(
            self,
            BreakerError::Store(_) | BreakerError::LockUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let open = BreakerError::CircuitOpen {
            id: "payments".to_string(),
        };
        assert!(open.is_short_circuit());
        assert!(!open.is_timeout());
        assert!(!open.is_coordination_failure());

        let timeout = BreakerError::Timeout(Duration::from_millis(50));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_short_circuit());

        let store = BreakerError::Store("connection refused".to_string());
        assert!(store.is_coordination_failure());

        let lock = BreakerError::LockUnavailable {
            name: "payments-lock".to_string(),
        };
        assert!(lock.is_coordination_failure());
    }

    #[test]
    fn test_display_messages() {
        let err = BreakerError::CircuitOpen {
            id: "search".to_string(),
        };
        assert_eq!(err.to_string(), "circuit open for search");

        let err = BreakerError::LockUnavailable {
            name: "search-lock".to_string(),
        };
        assert_eq!(err.to_string(), "failed to acquire lock search-lock");
    }
}
