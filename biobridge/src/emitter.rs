//! Subscription registry for host-pushed events.
//!
//! Listeners for one event fire in subscription order. A listener that panics
//! is logged and skipped: the remaining listeners still run and the panic
//! never reaches the caller of [`EventEmitter::emit`].

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// A registered event listener.
pub type Listener = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Handle returned by [`EventEmitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct EmitterInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
}

/// Per-facade event registry. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: Vec<String> = self.lock().keys().cloned().collect();
        f.debug_struct("EventEmitter")
            .field("events", &events)
            .finish()
    }
}

impl EventEmitter {
    /// Create an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn add<F>(&self, event: &str, once: bool, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(event.to_string()).or_default().push(Entry {
            id,
            once,
            listener: Arc::new(listener),
        });
        id
    }

    /// Subscribe to an event.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.add(event, false, listener)
    }

    /// Subscribe to the next occurrence of an event only.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.add(event, true, listener)
    }

    /// Unsubscribe a listener. Returns whether it was registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Remove every listener of one event, or of all events.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = self.lock();
        match event {
            Some(event) => {
                listeners.remove(event);
            }
            None => listeners.clear(),
        }
    }

    /// Number of listeners for an event.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Deliver an event to its listeners. Returns how many were invoked.
    pub fn emit(&self, event: &str, payload: &serde_json::Value) -> usize {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let snapshot: Vec<Entry> = {
            let mut listeners = self.lock();
            let Some(entries) = listeners.get_mut(event) else {
                return 0;
            };
            let snapshot = entries.clone();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                listeners.remove(event);
            }
            snapshot
        };

        for entry in &snapshot {
            let listener = Arc::clone(&entry.listener);
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!(event, "event listener panicked");
            }
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Listener {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Arc::new(move |payload: &serde_json::Value| {
                    log.lock().unwrap().push(format!("{tag}:{payload}"));
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_subscription_order() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        emitter.on("chainChanged", move |p| a(p));
        emitter.on("chainChanged", move |p| b(p));

        assert_eq!(emitter.emit("chainChanged", &json!("0x38")), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:\"0x38\"", "b:\"0x38\""]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let after = make("after");
        emitter.on("connect", |_| panic!("listener failure"));
        emitter.on("connect", move |p| after(p));

        assert_eq!(emitter.emit("connect", &json!(1)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["after:1"]);
    }

    #[test]
    fn test_off_and_once() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let id = emitter.on("x", move |p| a(p));
        emitter.once("x", move |p| b(p));

        emitter.emit("x", &json!(1));
        assert!(emitter.off("x", id));
        assert!(!emitter.off("x", id));
        emitter.emit("x", &json!(2));

        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1"]);
        assert_eq!(emitter.listener_count("x"), 0);
    }

    #[test]
    fn test_remove_all_listeners() {
        let emitter = EventEmitter::new();
        emitter.on("a", |_| {});
        emitter.on("b", |_| {});
        emitter.remove_all_listeners(Some("a"));
        assert_eq!(emitter.listener_count("a"), 0);
        assert_eq!(emitter.listener_count("b"), 1);
        emitter.remove_all_listeners(None);
        assert_eq!(emitter.listener_count("b"), 0);
        assert_eq!(emitter.emit("b", &json!(null)), 0);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let emitter = EventEmitter::new();
        let slot: Arc<StdMutex<Option<ListenerId>>> = Arc::new(StdMutex::new(None));
        let inner = emitter.clone();
        let slot_in = Arc::clone(&slot);
        let id = emitter.on("x", move |_| {
            if let Some(id) = *slot_in.lock().unwrap() {
                inner.off("x", id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(emitter.emit("x", &json!(null)), 1);
        assert_eq!(emitter.listener_count("x"), 0);
    }
}
