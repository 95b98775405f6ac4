//! In-process event bus with synchronous fan-out.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Handle returned from [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Type-keyed subscriber registry.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of `kind`.
    pub fn on<F>(&self, kind: &str, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unsubscribe. Returns false when the handler was not registered.
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(kind);
        }
        removed
    }

    /// Deliver `event` to every current subscriber of its kind.
    ///
    /// Handlers run on the caller's thread against a snapshot of the
    /// subscriber list; a panicking handler is logged and skipped.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<Handler> = match self.handlers.read().get(&event.kind) {
            Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("Event handler for '{}' panicked", event.kind);
            }
        }
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("kinds", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_matching_handlers_only() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.on("a", move |e| s.lock().push(format!("a:{}", e.payload)));
        let s = seen.clone();
        bus.on("b", move |e| s.lock().push(format!("b:{}", e.payload)));

        bus.emit(&Event::new("a", serde_json::json!(1)));
        bus.emit(&Event::new("c", serde_json::json!(2)));

        assert_eq!(*seen.lock(), vec!["a:1".to_string()]);
    }

    #[test]
    fn test_off_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = bus.on("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::new("tick", serde_json::Value::Null));
        assert!(bus.off("tick", id));
        assert!(!bus.off("tick", id));
        bus.emit(&Event::new("tick", serde_json::Value::Null));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count("tick"), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_fanout() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));
        bus.on("x", |_| panic!("boom"));
        let r = reached.clone();
        bus.on("x", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::new("x", serde_json::Value::Null));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.on("x", move |_| {
            inner.on("y", |_| {});
        });
        bus.emit(&Event::new("x", serde_json::Value::Null));
        assert_eq!(bus.handler_count("y"), 1);
    }
}
