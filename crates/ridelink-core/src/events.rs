//! In-process event fan-out
//!
//! Inbound server events and local lifecycle notices are published on an
//! [`EventBus`]. Each registration returns an [`EventSubscription`] handle
//! that the caller owns and removes explicitly with
//! [`EventSubscription::unsubscribe`]. Dropping a handle leaves the handler
//! registered.
//!
//! Handlers run synchronously, in registration order, on the emitting task.
//! A handler that fails (returns `Err` or panics) is logged and skipped; the
//! remaining handlers still run and the emitter never sees the failure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::warn;

use crate::error::HandlerError;

/// Live channel state transitions; payload `{ state, previous, attempt }`
pub const CONNECTION_STATE_CHANGED: &str = "connection-state-changed";
/// Reconnect budget exhausted; payload `{ attempts, reason }`
pub const CONNECTION_FAILED: &str = "connection-failed";
/// A queued action was dropped after its last retry; payload `{ action, error }`
pub const ACTION_DROPPED: &str = "action-dropped";
/// A flush cycle finished; payload is the flush report
pub const QUEUE_FLUSHED: &str = "queue-flushed";

/// Event handler callback
pub type Handler = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Identifies one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    event: String,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    registrations: Vec<Registration>,
}

/// Fan-out of named events to registered handlers
///
/// Cloning is cheap; clones share registrations.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

/// Handle pairing an event name with a registered handler
#[derive(Debug)]
pub struct EventSubscription {
    id: SubscriptionId,
    event: String,
    registry: Weak<Mutex<Registry>>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Whether the handler is still registered
    pub fn is_active(&self) -> bool {
        self.registry.upgrade().is_some_and(|registry| {
            lock(&registry)
                .registrations
                .iter()
                .any(|r| r.id == self.id)
        })
    }

    /// Remove the handler; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let before = registry.registrations.len();
        registry.registrations.retain(|r| r.id != self.id);
        registry.registrations.len() != before
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`
    pub fn on<F>(&self, event: &str, handler: F) -> EventSubscription
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.registrations.push(Registration {
            id,
            event: event.to_string(),
            handler: Arc::new(handler),
        });

        EventSubscription {
            id,
            event: event.to_string(),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every handler registered for `event`
    ///
    /// Returns how many handlers completed successfully.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        // Snapshot so handlers can register or unsubscribe while running
        let handlers: Vec<(SubscriptionId, Handler)> = lock(&self.registry)
            .registrations
            .iter()
            .filter(|r| r.event == event)
            .map(|r| (r.id, Arc::clone(&r.handler)))
            .collect();

        let mut succeeded = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(data))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    warn!(event, subscription = id.0, error = %e, "event handler failed");
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(event, subscription = id.0, panic = %message, "event handler panicked");
                }
            }
        }
        succeeded
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.registry)
            .registrations
            .iter()
            .filter(|r| r.event == event)
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventBus")
            .field("registrations", &registry.registrations.len())
            .finish()
    }
}

fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type BoxedHandler = Box<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> BoxedHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let make = move |name: &str| {
            let log = Arc::clone(&shared);
            let name = name.to_string();
            Box::new(move |data: &Value| {
                log.lock().unwrap().push(format!("{}:{}", name, data));
                Ok(())
            }) as BoxedHandler
        };
        (log, make)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let _a = bus.on("ride-status", make("a"));
        let _b = bus.on("ride-status", make("b"));
        let _other = bus.on("chat-message", make("c"));

        assert_eq!(bus.emit("ride-status", &json!(1)), 2);
        assert_eq!(bus.emit("ride-status", &json!(2)), 2);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:1", "b:1", "a:2", "b:2"]
        );
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let _first = bus.on("evt", make("first"));
        let _err = bus.on("evt", |_| Err(HandlerError::new("boom")));
        let _panic = bus.on("evt", |_| panic!("handler exploded"));
        let _last = bus.on("evt", make("last"));

        let succeeded = bus.emit("evt", &json!("x"));

        assert_eq!(succeeded, 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:\"x\"", "last:\"x\""]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let a = bus.on("evt", make("a"));
        let b = bus.on("evt", make("b"));
        assert!(a.is_active());
        assert_eq!(a.event(), "evt");
        assert_ne!(a.id(), b.id());

        assert!(a.unsubscribe());
        assert_eq!(bus.handler_count("evt"), 1);
        assert!(b.is_active());

        bus.emit("evt", &json!(null));
        assert_eq!(*log.lock().unwrap(), vec!["b:null"]);
    }

    #[test]
    fn test_dropped_handle_keeps_handler() {
        let bus = EventBus::new();
        let handles: Vec<_> = ["a", "b"].iter().map(|e| bus.on(e, |_| Ok(()))).collect();
        drop(bus.on("a", |_| Ok(())));
        assert_eq!(bus.handler_count("a"), 2);

        for handle in handles {
            handle.unsubscribe();
        }
        assert_eq!(bus.handler_count("a"), 1);
        assert_eq!(bus.handler_count("b"), 0);
    }

    #[test]
    fn test_emit_without_handlers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit("nobody-listens", &json!({})), 0);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = EventBus::new();
        let sub = bus.on("evt", |_| Ok(()));
        drop(bus);

        assert!(!sub.is_active());
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let _sub = bus.on("evt", move |_| {
            let _nested = inner_bus.on("evt", |_| Ok(()));
            Ok(())
        });

        assert_eq!(bus.emit("evt", &json!(1)), 1);
        assert_eq!(bus.handler_count("evt"), 2);
    }
}
