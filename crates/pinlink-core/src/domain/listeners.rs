//! Fan-out of decoded device events to registered observers.
//!
//! The receive loop calls [`ListenerRegistry::dispatch`] for every decoded
//! event and [`ListenerRegistry::notify_disconnect`] exactly once per lost
//! connection.  Listeners run on the receive task, so they must not block.
//!
//! The registry lock is released before any listener runs, so a listener may
//! register or unregister others (including itself) from inside a callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::protocol::packet::Event;

/// Observer of device events.
pub trait PacketListener: Send + Sync {
    /// Called for every decoded event.
    fn on_event(&self, _event: &Event) {}

    /// Called once when an established connection goes away.
    fn on_disconnect(&self) {}
}

/// Token returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Thread-safe set of listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<ListenerId, Arc<dyn PacketListener>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` and returns its removal token.
    pub fn register(&self, listener: Arc<dyn PacketListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().insert(id, listener);
        id
    }

    /// Removes a listener.  Returns `false` if it was already gone.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Delivers `event` to every listener registered at the time of the call.
    pub fn dispatch(&self, event: &Event) {
        for listener in self.snapshot() {
            listener.on_event(event);
        }
    }

    /// Tells every listener the connection is gone.
    pub fn notify_disconnect(&self) {
        for listener in self.snapshot() {
            listener.on_disconnect();
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn PacketListener>> {
        self.read().values().cloned().collect()
    }

    // A listener that panicked must not wedge the registry.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ListenerId, Arc<dyn PacketListener>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ListenerId, Arc<dyn PacketListener>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
        disconnects: AtomicUsize,
    }

    impl PacketListener for Recorder {
        fn on_event(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dispatch_reaches_every_listener() {
        // Arrange
        let registry = ListenerRegistry::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        registry.register(a.clone());
        registry.register(b.clone());

        // Act
        registry.dispatch(&Event::Pong(3));

        // Assert
        assert_eq!(*a.events.lock().unwrap(), vec![Event::Pong(3)]);
        assert_eq!(*b.events.lock().unwrap(), vec![Event::Pong(3)]);
    }

    #[test]
    fn test_unregistered_listener_receives_nothing() {
        let registry = ListenerRegistry::new();
        let rec = Arc::new(Recorder::default());
        let id = registry.register(rec.clone());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.dispatch(&Event::Pong(1));
        registry.notify_disconnect();

        assert!(rec.events.lock().unwrap().is_empty());
        assert_eq!(rec.disconnects.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_notify_disconnect_counts_once_per_call() {
        let registry = ListenerRegistry::new();
        let rec = Arc::new(Recorder::default());
        registry.register(rec.clone());

        registry.notify_disconnect();

        assert_eq!(rec.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unregister_itself_during_dispatch() {
        struct OneShot {
            registry: Arc<ListenerRegistry>,
            id: Mutex<Option<ListenerId>>,
            hits: AtomicUsize,
        }

        impl PacketListener for OneShot {
            fn on_event(&self, _event: &Event) {
                self.hits.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = self.id.lock().unwrap().take() {
                    self.registry.unregister(id);
                }
            }
        }

        // Arrange
        let registry = Arc::new(ListenerRegistry::new());
        let one_shot = Arc::new(OneShot {
            registry: registry.clone(),
            id: Mutex::new(None),
            hits: AtomicUsize::new(0),
        });
        let id = registry.register(one_shot.clone());
        *one_shot.id.lock().unwrap() = Some(id);

        // Act
        registry.dispatch(&Event::Pong(1));
        registry.dispatch(&Event::Pong(2));

        // Assert
        assert_eq!(one_shot.hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ListenerRegistry::new();
        let first = registry.register(Arc::new(Recorder::default()));
        let second = registry.register(Arc::new(Recorder::default()));

        assert_ne!(first, second);
    }
}
