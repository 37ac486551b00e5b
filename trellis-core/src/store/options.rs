//! Store configuration.

use std::fmt::{self, Debug};
use std::rc::Rc;

use super::scheduler::{Immediate, Scheduler};
use super::{StateStore, StoreEvent};

/// Copies the state before queued events are folded over it.
pub type CopyState<V> = Box<dyn Fn(&V) -> V>;

/// Replaces the default event fold.
///
/// Receives the current state, the queued events in dispatch order, and the
/// store. Returns the new state, or `None` to leave the state alone.
pub type ProcessQueue<V> = Box<dyn Fn(V, Vec<StoreEvent<V>>, &dyn StateStore<V>) -> Option<V>>;

/// How a store schedules and applies dispatched events.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = ManualScheduler::new();
/// let store = Store::with_options(
///     State::default(),
///     StoreOptions::new().scheduler(scheduler.clone()),
/// );
/// ```
pub struct StoreOptions<V> {
    pub(crate) scheduler: Rc<dyn Scheduler>,
    pub(crate) copy_state: Option<CopyState<V>>,
    pub(crate) process_queue: Option<ProcessQueue<V>>,
}

impl<V> StoreOptions<V> {
    /// Immediate scheduling and the default fold.
    pub fn new() -> Self {
        Self {
            scheduler: Rc::new(Immediate),
            copy_state: None,
            process_queue: None,
        }
    }

    pub fn scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        self.scheduler = Rc::new(scheduler);
        self
    }

    /// Copy the state with `copy` before folding events over it.
    ///
    /// Ignored when a custom [`process_queue`](Self::process_queue) is set.
    pub fn copy_state<F>(mut self, copy: F) -> Self
    where
        F: Fn(&V) -> V + 'static,
    {
        self.copy_state = Some(Box::new(copy));
        self
    }

    /// Apply queued events with `process` instead of the default fold.
    pub fn process_queue<F>(mut self, process: F) -> Self
    where
        F: Fn(V, Vec<StoreEvent<V>>, &dyn StateStore<V>) -> Option<V> + 'static,
    {
        self.process_queue = Some(Box::new(process));
        self
    }
}

impl<V> Default for StoreOptions<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Debug for StoreOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("copy_state", &self.copy_state.is_some())
            .field("process_queue", &self.process_queue.is_some())
            .finish_non_exhaustive()
    }
}
