//! Server event fan-out.
//!
//! Listeners, workers and the watchdog report what happens to them through an
//! [`EventBus`]. Subscribers implement [`EventListener`]; the default
//! [`TracingEventListener`] forwards every event to `tracing`.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ServerEvent {
    /// Component that raised the event, e.g. `listener` or `worker`
    pub source: &'static str,
    pub kind: EventKind,
    pub message: String,
    pub params: BTreeMap<&'static str, String>,
}

impl ServerEvent {
    pub fn new(source: &'static str, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.params.insert(key, value.to_string());
        self
    }
}

/// Receives server events. Implementations must return quickly.
pub trait EventListener: Send + Sync {
    fn notify(&self, event: &ServerEvent);
}

/// Thread-safe set of event listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// An event bus that logs through `tracing`.
    pub fn with_tracing() -> Self {
        let bus = Self::new();
        bus.subscribe(Arc::new(TracingEventListener));
        bus
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push(listener);
    }

    /// Deliver an event to every subscriber. A panicking subscriber is skipped.
    pub fn notify(&self, event: ServerEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.notify(&event))).is_err() {
                debug!(source = event.source, "Event listener panicked");
            }
        }
    }
}

/// Logs server events at the level matching their kind.
pub struct TracingEventListener;

impl EventListener for TracingEventListener {
    fn notify(&self, event: &ServerEvent) {
        let params = format!("{:?}", event.params);
        match event.kind {
            EventKind::Debug => debug!(source = event.source, params = %params, "{}", event.message),
            EventKind::Info => info!(source = event.source, params = %params, "{}", event.message),
            EventKind::Warning => warn!(source = event.source, params = %params, "{}", event.message),
            EventKind::Error => error!(source = event.source, params = %params, "{}", event.message),
        }
    }
}
