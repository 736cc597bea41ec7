//! The breaker orchestrator
//!
//! [`CircuitBreaker`] is the public surface: construct it over a shared
//! state store and lock, then [`fire`](CircuitBreaker::fire) operations
//! under a circuit ID. Every process constructing a breaker over the same
//! store and lock backend converges on the same per-ID state: once one
//! caller trips a circuit, every caller short-circuits until the grace
//! period has elapsed.
//!
//! Both the decision whether to run, short-circuit, or probe and the
//! commit of the outcome afterwards happen inside the circuit's critical
//! section. The operation itself always runs outside the lock.

use crate::backoff::{shared, Fixed, SharedBackoff};
use crate::circuit::{Circuit, CircuitState};
use crate::error::{BreakerError, Result};
use crate::events::{CircuitEvent, EventDispatcher, EventKind};
use crate::executor::{run_attempts, ExecOutcome};
use crate::lock::{run_critical, DistLock};
use crate::store::StateStore;
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Decides whether an operation error counts against the circuit
///
/// Return `true` to count the error as a failure. The default counts every
/// error.
pub type FailPredicate = Arc<dyn Fn(&BreakerError) -> bool + Send + Sync>;

/// Breaker tuning
///
/// ```
/// use breakwater::BreakerConfig;
/// use std::time::Duration;
///
/// let config = BreakerConfig {
///     threshold: 5,
///     grace_period: Duration::from_secs(2),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct BreakerConfig {
    /// Minimum time a circuit stays open before a recovery probe is allowed
    pub grace_period: Duration,

    /// Consecutive failures above which the circuit trips open
    pub threshold: u32,

    /// Per-attempt timeout for the wrapped operation
    pub timeout: Duration,

    /// Attempt budget per fire; only timed-out attempts consume it
    pub retry: u32,

    /// Delay policy between timed-out attempts
    pub backoff: SharedBackoff,

    /// Classifier for operation errors
    pub fail_predicate: FailPredicate,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(500),
            threshold: 1,
            timeout: Duration::from_secs(3),
            retry: 3,
            backoff: shared(Fixed::default()),
            fail_predicate: Arc::new(|_| true),
        }
    }
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("grace_period", &self.grace_period)
            .field("threshold", &self.threshold)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BreakerConfig {
    fn validate(&self) -> Result<()> {
        if self.retry == 0 {
            return Err(BreakerError::Config(
                "retry budget must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(BreakerError::Config(
                "per-attempt timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the admission check run inside the critical section
enum Admission {
    Execute,
    ShortCircuit,
}

/// Distributed circuit breaker
///
/// # Example
///
/// ```
/// use breakwater::{BreakerConfig, BreakerError, CircuitBreaker};
/// use breakwater::lock::LocalLock;
/// use breakwater::store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), BreakerError> {
/// let store = Arc::new(MemoryStore::new());
/// let lock = Arc::new(LocalLock::new());
/// let breaker = CircuitBreaker::new(store, lock, BreakerConfig::default())?;
///
/// let value = breaker
///     .fire("payments", || async { Ok::<_, BreakerError>(42) })
///     .await?;
/// assert_eq!(value, 42);
///
/// breaker.destroy().await;
/// # Ok(())
/// # }
/// ```
pub struct CircuitBreaker<S, L> {
    store: Arc<S>,
    lock: Arc<L>,
    config: BreakerConfig,
    events: Arc<EventDispatcher>,
    destroyed: Arc<AtomicBool>,
}

impl<S, L> Clone for CircuitBreaker<S, L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lock: self.lock.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            destroyed: self.destroyed.clone(),
        }
    }
}

impl<S, L> CircuitBreaker<S, L>
where
    S: StateStore,
    L: DistLock,
{
    /// Build a breaker over shared collaborators
    ///
    /// The store and lock may be shared with other breakers; the event
    /// dispatcher is exclusively owned by this breaker and its worker is
    /// spawned here, so construction must happen inside a Tokio runtime.
    pub fn new(store: Arc<S>, lock: Arc<L>, config: BreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            lock,
            config,
            events: Arc::new(EventDispatcher::new()),
            destroyed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Fire an operation under the circuit `id`
    ///
    /// Consults the replicated record (inside the circuit's critical
    /// section) to decide between running, short-circuiting, and probing;
    /// runs the operation outside the lock through the retry/timeout
    /// pipeline; re-enters the critical section to commit the outcome.
    pub async fn fire<T, F, Fut>(&self, id: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BreakerError::Destroyed);
        }

        match run_critical(self.lock.as_ref(), id, self.admit(id)).await? {
            Admission::ShortCircuit => {
                let err = BreakerError::CircuitOpen { id: id.to_string() };
                debug!(circuit_id = id, "short-circuiting");
                self.events.emit(id, EventKind::Fallback, Some(err.clone()));
                Err(err)
            }
            Admission::Execute => {
                let outcome = run_attempts(
                    id,
                    &operation,
                    self.config.timeout,
                    self.config.retry,
                    &self.config.backoff,
                    &self.config.fail_predicate,
                )
                .await;

                match outcome {
                    ExecOutcome::Success(value) => {
                        run_critical(self.lock.as_ref(), id, self.commit_success(id)).await?;
                        Ok(value)
                    }
                    ExecOutcome::Benign(err) => {
                        run_critical(self.lock.as_ref(), id, self.commit_success(id)).await?;
                        Err(err)
                    }
                    ExecOutcome::Failure(err) => {
                        run_critical(self.lock.as_ref(), id, self.commit_failure(id, err.clone()))
                            .await?;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Force the circuit open until an explicit [`reset`](Self::reset)
    ///
    /// Returns `true` once the isolation is persisted; `false` on a store
    /// or lock failure. Idempotent.
    pub async fn isolate(&self, id: &str) -> bool {
        let outcome = run_critical(self.lock.as_ref(), id, async {
            let mut circuit = self.store.get(id).await?.unwrap_or_default();
            circuit.state = CircuitState::Isolated;
            self.store.set(id, &circuit).await?;

            self.events.emit(id, EventKind::Open, None);
            let err = BreakerError::Operation(format!("isolating {id}"));
            self.events.emit(id, EventKind::Fallback, Some(err));
            Ok(())
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(circuit_id = id, "circuit isolated");
                true
            }
            Err(err) => {
                error!(circuit_id = id, error = %err, "could not isolate circuit");
                false
            }
        }
    }

    /// Return the circuit to a fresh closed state
    ///
    /// The only way out of isolation. Returns `true` once persisted;
    /// `false` on a store or lock failure. Idempotent.
    pub async fn reset(&self, id: &str) -> bool {
        let outcome = run_critical(self.lock.as_ref(), id, async {
            let mut circuit = self.store.get(id).await?.unwrap_or_default();
            circuit.close();
            self.store.set(id, &circuit).await?;
            self.events.emit(id, EventKind::Closed, None);
            Ok(())
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(circuit_id = id, "circuit reset");
                true
            }
            Err(err) => {
                error!(circuit_id = id, error = %err, "could not reset circuit");
                false
            }
        }
    }

    /// Register the callback for circuit-closed events; chainable
    pub fn on_closed<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.events.set_handler(EventKind::Closed, Arc::new(handler));
        self
    }

    /// Register the callback for circuit-opened events; chainable
    pub fn on_open<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.events.set_handler(EventKind::Open, Arc::new(handler));
        self
    }

    /// Register the callback for half-open events; chainable
    pub fn on_half_open<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.events
            .set_handler(EventKind::HalfOpen, Arc::new(handler));
        self
    }

    /// Register the callback for fallback events; chainable
    pub fn on_fallback<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.events
            .set_handler(EventKind::Fallback, Arc::new(handler));
        self
    }

    /// Tear down the event worker; idempotent
    ///
    /// Subsequent fires are refused with [`BreakerError::Destroyed`].
    pub async fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.events.shutdown().await;
        }
    }

    /// Advisory read of the current record, outside the critical section
    pub async fn current(&self, id: &str) -> Result<Option<Circuit>> {
        self.store.get(id).await
    }

    /// Read-or-initialise the record and dispatch on its state.
    /// Runs inside the critical section.
    async fn admit(&self, id: &str) -> Result<Admission> {
        let Some(mut circuit) = self.store.get(id).await? else {
            self.store.set(id, &Circuit::new()).await?;
            return Ok(Admission::Execute);
        };

        match circuit.state {
            CircuitState::Isolated => Ok(Admission::ShortCircuit),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(Admission::Execute),
            CircuitState::Open => {
                if circuit.grace_elapsed(self.config.grace_period, Utc::now()) {
                    circuit.state = CircuitState::HalfOpen;
                    self.store.set(id, &circuit).await?;
                    info!(circuit_id = id, "grace period elapsed, probing");
                    self.events.emit(id, EventKind::HalfOpen, None);
                    Ok(Admission::Execute)
                } else {
                    Ok(Admission::ShortCircuit)
                }
            }
        }
    }

    /// Commit a successful execution. Runs inside the critical section.
    ///
    /// The record is reloaded first: another process may have moved it
    /// while the operation ran. Isolation is sticky: a success does not
    /// lift it.
    async fn commit_success(&self, id: &str) -> Result<()> {
        let Some(mut circuit) = self.store.get(id).await? else {
            return Ok(());
        };

        match circuit.state {
            CircuitState::Closed | CircuitState::Isolated => Ok(()),
            CircuitState::Open | CircuitState::HalfOpen => {
                circuit.close();
                self.store.set(id, &circuit).await?;
                info!(circuit_id = id, "circuit closed");
                self.events.emit(id, EventKind::Closed, None);
                Ok(())
            }
        }
    }

    /// Commit a failed execution. Runs inside the critical section.
    ///
    /// Failures observed while the record is already open (or isolated, or
    /// gone) do not move the streak; the breaker has already concluded the
    /// circuit is bad. Every failure emits a fallback carrying the error.
    async fn commit_failure(&self, id: &str, err: BreakerError) -> Result<()> {
        let Some(mut circuit) = self.store.get(id).await? else {
            self.events.emit(id, EventKind::Fallback, Some(err));
            return Ok(());
        };

        match circuit.state {
            CircuitState::Open | CircuitState::Isolated => {
                self.events.emit(id, EventKind::Fallback, Some(err));
                Ok(())
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                circuit.failures += 1;
                if circuit.failures > self.config.threshold {
                    circuit.trip(Utc::now());
                    info!(
                        circuit_id = id,
                        failures = circuit.failures,
                        threshold = self.config.threshold,
                        "circuit tripped open"
                    );
                    self.events.emit(id, EventKind::Open, None);
                }
                self.store.set(id, &circuit).await?;
                self.events.emit(id, EventKind::Fallback, Some(err));
                Ok(())
            }
        }
    }
}

/// Breaker that owns its wrapped operation
///
/// Where [`CircuitBreaker::fire`] accepts a fresh nullary operation per
/// call, a `WrappedBreaker` is built once over a function of the call
/// arguments; [`fire`](WrappedBreaker::fire) packages the arguments and
/// delegates to the shared path. Multi-argument functions are wrapped with
/// a tuple-taking closure.
///
/// ```
/// use breakwater::{BreakerConfig, BreakerError, WrappedBreaker};
/// use breakwater::lock::LocalLock;
/// use breakwater::store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), BreakerError> {
/// let breaker = WrappedBreaker::wrap(
///     |(name, factor): (String, i64)| async move {
///         let _ = name;
///         Ok::<_, BreakerError>(5 * factor)
///     },
///     Arc::new(MemoryStore::new()),
///     Arc::new(LocalLock::new()),
///     BreakerConfig::default(),
/// )?;
///
/// let value = breaker.fire("greet", ("daniel".to_string(), 2)).await?;
/// assert_eq!(value, 10);
/// breaker.destroy().await;
/// # Ok(())
/// # }
/// ```
pub struct WrappedBreaker<S, L, F> {
    breaker: CircuitBreaker<S, L>,
    operation: Arc<F>,
}

impl<S, L, F> WrappedBreaker<S, L, F>
where
    S: StateStore,
    L: DistLock,
{
    /// Build a breaker around `operation`
    pub fn wrap(operation: F, store: Arc<S>, lock: Arc<L>, config: BreakerConfig) -> Result<Self> {
        Ok(Self {
            breaker: CircuitBreaker::new(store, lock, config)?,
            operation: Arc::new(operation),
        })
    }

    /// Fire the wrapped operation with `args` under the circuit `id`
    pub async fn fire<A, Fut, T>(&self, id: &str, args: A) -> Result<T>
    where
        F: Fn(A) -> Fut + Send + Sync,
        A: Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let operation = self.operation.clone();
        self.breaker
            .fire(id, move || (*operation)(args.clone()))
            .await
    }

    /// See [`CircuitBreaker::isolate`]
    pub async fn isolate(&self, id: &str) -> bool {
        self.breaker.isolate(id).await
    }

    /// See [`CircuitBreaker::reset`]
    pub async fn reset(&self, id: &str) -> bool {
        self.breaker.reset(id).await
    }

    /// See [`CircuitBreaker::on_closed`]
    pub fn on_closed<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.breaker.on_closed(handler);
        self
    }

    /// See [`CircuitBreaker::on_open`]
    pub fn on_open<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.breaker.on_open(handler);
        self
    }

    /// See [`CircuitBreaker::on_half_open`]
    pub fn on_half_open<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.breaker.on_half_open(handler);
        self
    }

    /// See [`CircuitBreaker::on_fallback`]
    pub fn on_fallback<H>(&self, handler: H) -> &Self
    where
        H: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.breaker.on_fallback(handler);
        self
    }

    /// See [`CircuitBreaker::destroy`]
    pub async fn destroy(&self) {
        self.breaker.destroy().await;
    }

    /// See [`CircuitBreaker::current`]
    pub async fn current(&self, id: &str) -> Result<Option<Circuit>> {
        self.breaker.current(id).await
    }
}
