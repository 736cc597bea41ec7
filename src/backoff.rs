//! Backoff policies for spacing retry attempts
//!
//! A policy yields the delay to wait before the next attempt. `Fixed` is
//! pure; `Exponential` carries a running attempt counter, so one instance
//! represents one retry sequence. There is deliberately no reset method:
//! construct a fresh instance for a fresh sequence.
//!
//! The breaker holds its policy behind [`SharedBackoff`], so cloning a
//! configuration shares the instance, and with it the attempt counter.
//! Sharing one exponential policy across breakers makes their retry
//! sequences interfere and is discouraged.

use crate::error::{BreakerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default delay for a [`Fixed`] policy constructed with a zero duration
const FIXED_DEFAULT: Duration = Duration::from_millis(300);

/// Default lower bound for [`Exponential`]
const EXP_DEFAULT_MIN: Duration = Duration::from_millis(100);

/// Default upper bound for [`Exponential`]
const EXP_DEFAULT_MAX: Duration = Duration::from_secs(10);

/// Default growth factor for [`Exponential`]
const EXP_DEFAULT_FACTOR: f64 = 2.0;

/// Produces the delay before each successive retry attempt
pub trait Backoff: Send {
    /// Delay before the next attempt
    fn delay(&mut self) -> Duration;
}

/// The form in which a breaker configuration holds its policy
pub type SharedBackoff = Arc<Mutex<dyn Backoff>>;

/// Wrap a policy for use in a breaker configuration
pub fn shared<B: Backoff + 'static>(backoff: B) -> SharedBackoff {
    Arc::new(Mutex::new(backoff))
}

/// Constant delay between attempts
///
/// A zero wait duration means "unset" and falls back to 300 ms.
#[derive(Debug, Clone, Copy)]
pub struct Fixed {
    wait: Duration,
}

impl Fixed {
    /// Fixed policy with the given delay
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl Default for Fixed {
    fn default() -> Self {
        Self {
            wait: FIXED_DEFAULT,
        }
    }
}

impl Backoff for Fixed {
    fn delay(&mut self) -> Duration {
        if self.wait.is_zero() {
            FIXED_DEFAULT
        } else {
            self.wait
        }
    }
}

/// Exponentially growing delay, clamped to `[min, max]`
///
/// The n-th delay is `min * factor^n`, saturating at `max`. The sequence is
/// non-decreasing until the clamp, then constant.
#[derive(Debug, Clone)]
pub struct Exponential {
    min: Duration,
    max: Duration,
    factor: f64,
    attempt: u32,
}

impl Exponential {
    /// Build a policy, validating that `min <= max`
    pub fn new(min: Duration, max: Duration, factor: f64) -> Result<Self> {
        if min > max {
            return Err(BreakerError::Config(format!(
                "backoff min {}ms cannot be greater than max {}ms",
                min.as_millis(),
                max.as_millis()
            )));
        }
        Ok(Self {
            min,
            max,
            factor,
            attempt: 0,
        })
    }
}

impl Default for Exponential {
    fn default() -> Self {
        Self {
            min: EXP_DEFAULT_MIN,
            max: EXP_DEFAULT_MAX,
            factor: EXP_DEFAULT_FACTOR,
            attempt: 0,
        }
    }
}

impl Backoff for Exponential {
    fn delay(&mut self) -> Duration {
        let scaled = self.min.as_nanos() as f64 * self.factor.powi(self.attempt as i32);
        self.attempt = self.attempt.saturating_add(1);

        // The f64 product can overflow the nanosecond range long before the
        // counter does; saturate at the upper clamp.
        if !scaled.is_finite() || scaled >= self.max.as_nanos() as f64 {
            return self.max;
        }

        let delay = Duration::from_nanos(scaled as u64);
        delay.clamp(self.min, self.max)
    }
}
