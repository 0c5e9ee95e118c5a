//! In-process event dispatcher.
//!
//! Handlers are registered per [`EventKind`] and invoked synchronously on the
//! publishing thread. Topic subscribers receive events through a
//! `crossbeam-channel` receiver instead.
//!
//! A handler that returns an error or panics never reaches the publisher:
//! the failure is logged and re-published as
//! [`SchedulerEvent::ErrorOccurred`]. Failures raised while handling an
//! `ErrorOccurred` event are only logged, which bounds the recursion.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::core::events::{EventBus, EventKind, SchedulerEvent};

/// Error returned by an event handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Registered handler.
pub type EventHandler = Arc<dyn Fn(&SchedulerEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Identifier returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Subscriber {
    topic: Option<EventKind>,
    tx: Sender<SchedulerEvent>,
}

/// Event bus with handler isolation, topic subscriptions and per-kind
/// statistics.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<(HandlerId, EventHandler)>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    statistics: Mutex<HashMap<EventKind, u64>>,
    enabled: AtomicBool,
    next_id: AtomicU64,
    in_flight: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Enabled dispatcher with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            statistics: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&SchedulerEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Remove every handler.
    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Receive events of `kind`, or of every kind when `None`. The stream
    /// ends when the dispatcher is dropped.
    pub fn subscribe(&self, topic: Option<EventKind>) -> Receiver<SchedulerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(Subscriber { topic, tx });
        rx
    }

    /// Enable or disable dispatch. Disabled dispatch drops events.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether dispatch is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Events dispatched so far, per kind.
    #[must_use]
    pub fn statistics(&self) -> HashMap<EventKind, u64> {
        self.statistics.lock().clone()
    }

    /// Events currently being dispatched.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Dispatch one event to handlers and subscribers.
    pub fn dispatch(&self, event: &SchedulerEvent) {
        if !self.is_enabled() {
            return;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let kind = event.kind();
        *self.statistics.lock().entry(kind).or_insert(0) += 1;

        self.subscribers.lock().retain(|sub| {
            if sub.topic.is_some_and(|t| t != kind) {
                return true;
            }
            sub.tx.send(event.clone()).is_ok()
        });

        // Handlers run without the registry lock so they may register others.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("event handler for {kind} failed: {e}"),
                Err(_) => format!("event handler for {kind} panicked"),
            };
            if kind == EventKind::ErrorOccurred {
                error!(%message, "failure while handling an error event; not re-dispatched");
                continue;
            }
            warn!(%message, "event handler error");
            self.dispatch(&SchedulerEvent::ErrorOccurred {
                source: "event_dispatcher".into(),
                message,
            });
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug!(topic = kind.topic(), "event dispatched");
    }
}

impl EventBus for EventDispatcher {
    fn publish(&self, event: SchedulerEvent) {
        self.dispatch(&event);
    }
}
