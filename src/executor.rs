//! The attempt loop: per-attempt timeout, bounded retries, backoff
//!
//! Each attempt spawns the operation and races it against the per-attempt
//! timer. Only timeouts consume the retry budget; any returned result,
//! success or failure, ends the loop immediately. A timed-out attempt's
//! task is not aborted: it keeps running detached and its eventual result
//! is discarded, so its side effects remain observable.

use crate::backoff::SharedBackoff;
use crate::breaker::FailPredicate;
use crate::error::BreakerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// How an execution ended, as seen by the state machine
pub(crate) enum ExecOutcome<T> {
    /// The operation produced a value
    Success(T),

    /// The operation errored, but the fail-predicate classified the error
    /// as benign: committed as success, error still returned to the caller
    Benign(BreakerError),

    /// A failure that counts against the circuit
    Failure(BreakerError),
}

/// Drive the operation through the retry loop
///
/// `retry` is the total attempt budget and is at least 1 (validated at
/// breaker construction).
pub(crate) async fn run_attempts<T, F, Fut>(
    circuit_id: &str,
    operation: &F,
    attempt_timeout: Duration,
    retry: u32,
    backoff: &SharedBackoff,
    fail_predicate: &FailPredicate,
) -> ExecOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BreakerError>> + Send + 'static,
    T: Send + 'static,
{
    let mut timeouts = 0;
    let mut delay = Duration::ZERO;

    loop {
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut task = tokio::spawn(operation());

        match timeout(attempt_timeout, &mut task).await {
            Ok(Ok(Ok(value))) => return ExecOutcome::Success(value),
            Ok(Ok(Err(err))) => {
                return if fail_predicate(&err) {
                    ExecOutcome::Failure(err)
                } else {
                    debug!(circuit_id, error = %err, "error classified as benign");
                    ExecOutcome::Benign(err)
                };
            }
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    let message = panic_message(join_err.into_panic());
                    warn!(circuit_id, message, "operation panicked");
                    return ExecOutcome::Failure(BreakerError::Panic(message));
                }
                // Only reachable if the runtime is shutting down under us
                return ExecOutcome::Failure(BreakerError::Operation(
                    "operation task was cancelled".to_string(),
                ));
            }
            Err(_elapsed) => {
                timeouts += 1;
                debug!(
                    circuit_id,
                    attempt = timeouts,
                    budget = retry,
                    timeout_ms = attempt_timeout.as_millis() as u64,
                    "attempt timed out"
                );
                // `task` is dropped without aborting: the attempt keeps
                // running detached and its result is discarded.
                if timeouts >= retry {
                    return ExecOutcome::Failure(BreakerError::Timeout(attempt_timeout));
                }
                delay = backoff.lock().await.delay();
            }
        }
    }
}

/// Best-effort extraction of a panic payload's message
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic occurred".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{shared, Fixed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn any_error() -> FailPredicate {
        Arc::new(|_| true)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let backoff = shared(Fixed::new(Duration::from_millis(10)));
        let outcome = run_attempts(
            "payments",
            &|| async { Ok(42) },
            Duration::from_millis(100),
            3,
            &backoff,
            &any_error(),
        )
        .await;

        assert!(matches!(outcome, ExecOutcome::Success(42)));
    }

    #[tokio::test]
    async fn test_error_ends_the_loop_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let backoff = shared(Fixed::new(Duration::from_millis(10)));
        let outcome: ExecOutcome<()> = run_attempts(
            "payments",
            &move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BreakerError::Operation("boom".to_string()))
                }
            },
            Duration::from_millis(100),
            3,
            &backoff,
            &any_error(),
        )
        .await;

        assert!(matches!(
            outcome,
            ExecOutcome::Failure(BreakerError::Operation(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_benign_error_when_predicate_declines() {
        let predicate: FailPredicate =
            Arc::new(|err| !matches!(err, BreakerError::Operation(_)));

        let backoff = shared(Fixed::new(Duration::from_millis(10)));
        let outcome: ExecOutcome<()> = run_attempts(
            "payments",
            &|| async { Err(BreakerError::Operation("expected".to_string())) },
            Duration::from_millis(100),
            3,
            &backoff,
            &predicate,
        )
        .await;

        assert!(matches!(outcome, ExecOutcome::Benign(_)));
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_the_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let backoff = shared(Fixed::new(Duration::from_millis(10)));
        let outcome: ExecOutcome<()> = run_attempts(
            "payments",
            &move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(200)).await;
                    Ok(())
                }
            },
            Duration::from_millis(30),
            3,
            &backoff,
            &any_error(),
        )
        .await;

        assert!(matches!(
            outcome,
            ExecOutcome::Failure(BreakerError::Timeout(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_then_fast_recovers_within_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let backoff = shared(Fixed::new(Duration::from_millis(10)));
        let outcome = run_attempts(
            "payments",
            &move || {
                let counter = counter.clone();
                async move {
                    // Only the first attempt is slow
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        sleep(Duration::from_millis(200)).await;
                    }
                    Ok(7)
                }
            },
            Duration::from_millis(50),
            3,
            &backoff,
            &any_error(),
        )
        .await;

        assert!(matches!(outcome, ExecOutcome::Success(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let backoff = shared(Fixed::new(Duration::from_millis(10)));
        let outcome: ExecOutcome<()> = run_attempts(
            "payments",
            &|| async { panic!("kaboom") },
            Duration::from_millis(100),
            3,
            &backoff,
            &any_error(),
        )
        .await;

        match outcome {
            ExecOutcome::Failure(BreakerError::Panic(message)) => {
                assert!(message.contains("kaboom"));
            }
            _ => panic!("expected a contained panic"),
        }
    }
}
