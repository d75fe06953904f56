// =============================================================================
// Generic listener table — the building block behind the Signal Bus and
// every Feed Adapter's own price/orderbook event stream.
// =============================================================================
//
// Not a general-purpose pub/sub crate: just a registration table plus a
// synchronous, panic-isolated dispatch loop, matching DESIGN NOTES'
// "explicit publish/subscribe hub" guidance.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::error;

/// Opaque handle returned by `on`, used to detach a single listener via
/// `off` without disturbing the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<T> {
    id: ListenerId,
    listener: Box<dyn Fn(&T) + Send + Sync>,
}

/// A typed listener table for events of type `T`.
pub struct EventEmitter<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Entry<T>>>,
    label: &'static str,
}

impl<T> EventEmitter<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            label,
        }
    }

    pub fn on(&self, listener: Box<dyn Fn(&T) + Send + Sync>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Entry { id, listener });
        id
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.write().retain(|e| e.id != id);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every current listener, isolating each one's panic so it
    /// cannot abort delivery to the rest. Returns `true` iff at least one
    /// listener was attached.
    pub fn emit(&self, event: &T) -> bool {
        let listeners = self.listeners.read();
        for entry in listeners.iter() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (entry.listener)(event))) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "listener panicked".to_string());
                error!(event = self.label, listener_id = entry.id.0, error = %msg, "listener failed");
            }
        }
        !listeners.is_empty()
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new("event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtoOrdering};
    use std::sync::Arc;

    #[test]
    fn isolates_panicking_listener_from_siblings() {
        let emitter: EventEmitter<u32> = EventEmitter::new("test");
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        emitter.on(Box::new(move |_| {
            r.fetch_add(1, AtoOrdering::SeqCst);
        }));
        emitter.on(Box::new(|_| panic!("boom")));
        let r2 = Arc::clone(&ran);
        emitter.on(Box::new(move |_| {
            r2.fetch_add(1, AtoOrdering::SeqCst);
        }));

        assert!(emitter.emit(&7));
        assert_eq!(ran.load(AtoOrdering::SeqCst), 2);
    }

    #[test]
    fn off_removes_exactly_one_listener() {
        let emitter: EventEmitter<u32> = EventEmitter::new("test");
        let id = emitter.on(Box::new(|_| {}));
        emitter.on(Box::new(|_| {}));
        assert_eq!(emitter.len(), 2);
        emitter.off(id);
        assert_eq!(emitter.len(), 1);
    }
}
