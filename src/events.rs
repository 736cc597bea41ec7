//! State-change and fallback notifications
//!
//! Each breaker owns one dispatcher: an unbounded queue drained by a single
//! background worker that invokes the registered callback for the event's
//! kind. Enqueueing never blocks, so the breaker can emit while holding a
//! circuit's critical section. Events for one circuit ID are delivered in
//! the order their transitions were committed by this breaker instance; no
//! cross-process ordering is provided.

use crate::error::BreakerError;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// What happened to a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The circuit (re-)entered normal operation
    Closed,
    /// The circuit tripped open
    Open,
    /// The circuit entered the recovery-probe state
    HalfOpen,
    /// A request was refused or failed
    Fallback,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventKind::Closed => "closed",
            EventKind::Open => "open",
            EventKind::HalfOpen => "half-open",
            EventKind::Fallback => "fallback",
        })
    }
}

/// A single notification
#[derive(Debug, Clone)]
pub struct CircuitEvent {
    /// The circuit this event concerns
    pub circuit_id: String,

    /// What happened
    pub kind: EventKind,

    /// For fallbacks, the underlying error
    pub error: Option<BreakerError>,
}

/// User callback for one event kind
pub type EventCallback = Arc<dyn Fn(&CircuitEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_closed: RwLock<Option<EventCallback>>,
    on_open: RwLock<Option<EventCallback>>,
    on_half_open: RwLock<Option<EventCallback>>,
    on_fallback: RwLock<Option<EventCallback>>,
}

impl Handlers {
    fn slot(&self, kind: EventKind) -> &RwLock<Option<EventCallback>> {
        match kind {
            EventKind::Closed => &self.on_closed,
            EventKind::Open => &self.on_open,
            EventKind::HalfOpen => &self.on_half_open,
            EventKind::Fallback => &self.on_fallback,
        }
    }

    fn get(&self, kind: EventKind) -> Option<EventCallback> {
        self.slot(kind)
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, kind: EventKind, callback: EventCallback) {
        *self
            .slot(kind)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(callback);
    }
}

/// Per-breaker event queue and its drain worker
pub(crate) struct EventDispatcher {
    tx: RwLock<Option<mpsc::UnboundedSender<CircuitEvent>>>,
    handlers: Arc<Handlers>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Start the dispatcher and its worker
    pub(crate) fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CircuitEvent>();
        let handlers = Arc::new(Handlers::default());

        let worker_handlers = handlers.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(callback) = worker_handlers.get(event.kind) {
                    callback(&event);
                }
            }
            debug!("event dispatcher drained");
        });

        Self {
            tx: RwLock::new(Some(tx)),
            handlers,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue an event; silently dropped after shutdown
    pub(crate) fn emit(&self, circuit_id: &str, kind: EventKind, error: Option<BreakerError>) {
        let tx = self
            .tx
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(tx) = tx {
            let _ = tx.send(CircuitEvent {
                circuit_id: circuit_id.to_string(),
                kind,
                error,
            });
        }
    }

    /// Atomically replace the callback for one event kind
    pub(crate) fn set_handler(&self, kind: EventKind, callback: EventCallback) {
        self.handlers.replace(kind, callback);
    }

    /// Stop accepting events, drain the queue, and stop the worker
    ///
    /// Idempotent; later `emit` calls are silently dropped.
    pub(crate) async fn shutdown(&self) {
        let tx = self
            .tx
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(tx);

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "event worker ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// The worker runs concurrently; give it a moment to catch up
    async fn drain() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_callback_receives_events() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        dispatcher.set_handler(
            EventKind::Open,
            Arc::new(move |event| {
                sink.try_lock().unwrap().push(event.circuit_id.clone());
            }),
        );

        dispatcher.emit("payments", EventKind::Open, None);
        dispatcher.emit("search", EventKind::Open, None);
        // No closed handler registered: silently ignored
        dispatcher.emit("payments", EventKind::Closed, None);

        drain().await;
        assert_eq!(*seen.lock().await, vec!["payments", "search"]);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_fallback_carries_error() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        dispatcher.set_handler(
            EventKind::Fallback,
            Arc::new(move |event| {
                assert!(matches!(
                    event.error,
                    Some(BreakerError::CircuitOpen { .. })
                ));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.emit(
            "payments",
            EventKind::Fallback,
            Some(BreakerError::CircuitOpen {
                id: "payments".to_string(),
            }),
        );

        drain().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_replacing_a_handler() {
        let dispatcher = EventDispatcher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        dispatcher.set_handler(
            EventKind::Closed,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.emit("payments", EventKind::Closed, None);
        drain().await;

        let counter = second.clone();
        dispatcher.set_handler(
            EventKind::Closed,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.emit("payments", EventKind::Closed, None);
        drain().await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        dispatcher.set_handler(
            EventKind::Open,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.emit("payments", EventKind::Open, None);
        dispatcher.shutdown().await;
        dispatcher.shutdown().await;

        // Emitted before shutdown: delivered during the drain
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Emitted after shutdown: dropped without panicking
        dispatcher.emit("payments", EventKind::Open, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
