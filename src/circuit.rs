//! The replicated circuit record
//!
//! One `Circuit` exists per circuit ID in the shared state store. Every
//! cooperating process reads and writes the same record, so its encoding is
//! part of the cross-process contract: the state is stored as a small
//! integer and the opened-at timestamp as wall-clock time (monotonic clocks
//! are meaningless across processes).

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// State of a circuit
///
/// - `Closed`: normal operation, requests flow through
/// - `Open`: requests are refused, the dependency is presumed unhealthy
/// - `HalfOpen`: probe state after the grace period; the next execution's
///   outcome decides the next transition
/// - `Isolated`: manually forced open; only a reset leaves this state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    Isolated,
}

impl CircuitState {
    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
            CircuitState::Isolated => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CircuitState::Closed),
            1 => Some(CircuitState::Open),
            2 => Some(CircuitState::HalfOpen),
            3 => Some(CircuitState::Isolated),
            _ => None,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Isolated => "isolated",
        })
    }
}

// Wire encoding is a bare integer (0..=3) so records written by other
// implementations of this protocol stay readable.
impl Serialize for CircuitState {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for CircuitState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        CircuitState::from_u8(value)
            .ok_or_else(|| de::Error::custom(format!("invalid circuit state {}", value)))
    }
}

/// The unit replicated in the state store, one per circuit ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// Current state
    pub state: CircuitState,

    /// Consecutive failures accumulated while closed or half-open
    pub failures: u32,

    /// When the circuit most recently transitioned to open; `None` while
    /// not open
    pub opened_at: Option<DateTime<Utc>>,
}

impl Circuit {
    /// A freshly initialised record: closed, no failures
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            opened_at: None,
        }
    }

    /// Trip the circuit open at `now`
    pub(crate) fn trip(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }

    /// Return to the closed state and clear the failure streak
    pub(crate) fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.opened_at = None;
    }

    /// Whether the grace period has elapsed since the circuit opened
    ///
    /// A missing `opened_at` on an open record is treated as eligible: the
    /// record is malformed and probing is the only way out.
    pub(crate) fn grace_elapsed(&self, grace_period: std::time::Duration, now: DateTime<Utc>) -> bool {
        match self.opened_at {
            Some(opened_at) => {
                let grace = chrono::Duration::from_std(grace_period)
                    .unwrap_or(chrono::Duration::MAX);
                now.signed_duration_since(opened_at) > grace
            }
            None => true,
        }
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}
