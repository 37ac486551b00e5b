//! Subscriber handles for publish/subscribe nodes.
//!
//! A subscriber is a change handler registered with a publishing node. The
//! publisher hands out a [`SubscriberId`] so the handler can later be removed
//! without comparing closures.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Unique identifier for a registered change handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change handler receiving the publisher's new value.
pub type Handler<T> = Rc<dyn Fn(&T)>;

/// Ordered set of change handlers.
///
/// Handlers are invoked in registration order. Notification works on a
/// snapshot, so handlers may subscribe or unsubscribe while being notified.
pub struct Subscribers<T> {
    handlers: IndexMap<SubscriberId, Handler<T>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }

    /// Register a handler and return its ID.
    pub fn insert(&mut self, handler: Handler<T>) -> SubscriberId {
        let id = SubscriberId::new();
        self.handlers.insert(id, handler);
        id
    }

    /// Remove a handler. Returns `true` if it was registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.handlers.shift_remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Copy out the current handlers so they can be called without holding
    /// a borrow on the set.
    pub fn snapshot(&self) -> SmallVec<[Handler<T>; 4]> {
        self.handlers.values().cloned().collect()
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("ids", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut subscribers = Subscribers::<i32>::new();

        for tag in ["first", "second", "third"] {
            let log_clone = log.clone();
            subscribers.insert(Rc::new(move |v: &i32| {
                log_clone.borrow_mut().push(format!("{tag}:{v}"));
            }));
        }

        for handler in subscribers.snapshot() {
            handler(&7);
        }

        assert_eq!(*log.borrow(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn removed_handler_is_not_called() {
        let call_count = Rc::new(Cell::new(0));
        let call_count_clone = call_count.clone();

        let mut subscribers = Subscribers::<()>::new();
        let id = subscribers.insert(Rc::new(move |_| {
            call_count_clone.set(call_count_clone.get() + 1);
        }));

        assert!(subscribers.remove(id));
        assert!(!subscribers.remove(id));
        assert!(subscribers.is_empty());

        for handler in subscribers.snapshot() {
            handler(&());
        }
        assert_eq!(call_count.get(), 0);
    }
}
