//! Dispatch Queue
//!
//! Events dispatched to a store are queued and applied together in one
//! flush, so that a burst of dispatches produces a single state update and a
//! single propagation.
//!
//! # States
//!
//! ```text
//!            dispatch                 scheduler runs flush
//!   Idle ─────────────────▶ Deferred ──────────────────────▶ Running
//!    ▲                          ▲                               │
//!    │      queue empty         │     events queued meanwhile   │
//!    └──────────────────────────┼───────────────────────────────┤
//!                               └───────────────────────────────┘
//! ```
//!
//! - **Idle**: nothing queued, no flush scheduled.
//! - **Deferred**: a flush is scheduled; further dispatches only queue.
//! - **Running**: a flush is applying events. Dispatches queue for the next
//!   flush, and synchronous dispatch is refused.
//!
//! The phase moves to Deferred before the scheduler is asked for a flush, so
//! a scheduler that runs the flush on the spot finds the queue in a
//! consistent state.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::options::{CopyState, ProcessQueue, StoreOptions};
use super::scheduler::Scheduler;
use super::{StateStore, StoreEvent};
use crate::error::{Error, Result};

/// Phase of a store's dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePhase {
    Idle,
    Deferred,
    Running,
}

/// Fold `events` over `state` in order.
///
/// Each event sees the state left by the previous one. Returns `None` if
/// every event declined to change anything.
pub fn fold_events<V>(state: V, events: Vec<StoreEvent<V>>, store: &dyn StateStore<V>) -> Option<V> {
    let mut current = state;
    let mut changed = false;
    for event in events {
        if let Some(next) = event(&current, store) {
            current = next;
            changed = true;
        }
    }
    changed.then_some(current)
}

enum Strategy<V> {
    Fold { copy_state: Option<CopyState<V>> },
    Custom(ProcessQueue<V>),
}

/// Queue of pending events for one store.
pub(crate) struct DispatchQueue<V: 'static> {
    target: Weak<dyn StateStore<V>>,
    phase: Cell<QueuePhase>,
    queue: RefCell<Vec<StoreEvent<V>>>,
    scheduler: Rc<dyn Scheduler>,
    strategy: Strategy<V>,
}

impl<V: 'static> DispatchQueue<V> {
    pub(crate) fn new(target: Weak<dyn StateStore<V>>, options: StoreOptions<V>) -> Rc<Self> {
        let StoreOptions {
            scheduler,
            copy_state,
            process_queue,
        } = options;

        let strategy = match process_queue {
            Some(process) => Strategy::Custom(process),
            None => Strategy::Fold { copy_state },
        };

        Rc::new(Self {
            target,
            phase: Cell::new(QueuePhase::Idle),
            queue: RefCell::new(Vec::new()),
            scheduler,
            strategy,
        })
    }

    pub(crate) fn phase(&self) -> QueuePhase {
        self.phase.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Queue `event`, scheduling a flush if none is pending.
    pub(crate) fn enqueue(self: &Rc<Self>, event: StoreEvent<V>) {
        self.queue.borrow_mut().push(event);

        match self.phase.get() {
            QueuePhase::Idle => {
                self.phase.set(QueuePhase::Deferred);
                trace!("flush scheduled");
                self.schedule_flush();
            }
            QueuePhase::Deferred | QueuePhase::Running => {
                trace!(queued = self.len(), "event queued");
            }
        }
    }

    fn schedule_flush(self: &Rc<Self>) {
        let queue = Rc::downgrade(self);
        self.scheduler.defer(Box::new(move || {
            if let Some(queue) = queue.upgrade() {
                queue.run_queued();
            }
        }));
    }

    /// Apply everything queued so far.
    fn run_queued(self: &Rc<Self>) {
        let Some(store) = self.target.upgrade() else {
            self.queue.borrow_mut().clear();
            self.phase.set(QueuePhase::Idle);
            return;
        };

        self.phase.set(QueuePhase::Running);
        let events = std::mem::take(&mut *self.queue.borrow_mut());
        debug!(events = events.len(), "flushing dispatch queue");

        {
            let _reset = ResetOnUnwind(&self.phase);
            self.apply(&*store, events);
        }

        if self.queue.borrow().is_empty() {
            self.phase.set(QueuePhase::Idle);
        } else {
            // dispatched while running
            self.phase.set(QueuePhase::Deferred);
            self.schedule_flush();
        }
    }

    /// Apply `event` right away, bypassing the queue.
    pub(crate) fn apply_now(&self, store: &dyn StateStore<V>, event: StoreEvent<V>) -> Result<()> {
        if self.phase.get() == QueuePhase::Running {
            return Err(Error::IllegalReentrantDispatch);
        }
        self.apply(store, vec![event]);
        Ok(())
    }

    fn apply(&self, store: &dyn StateStore<V>, events: Vec<StoreEvent<V>>) {
        let state = store.get_snapshot();

        let next = match &self.strategy {
            Strategy::Custom(process) => process(state, events, store),
            Strategy::Fold { copy_state } => {
                let seed = match copy_state {
                    Some(copy) => copy(&state),
                    None => state,
                };
                fold_events(seed, events, store)
            }
        };

        match next {
            Some(next) => store.load_snapshot(next),
            None => trace!("events left the state unchanged"),
        }
    }
}

impl<V: 'static> Debug for DispatchQueue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("phase", &self.phase())
            .field("queued", &self.len())
            .finish()
    }
}

/// Puts the queue back to Idle if a flush panics.
struct ResetOnUnwind<'a>(&'a Cell<QueuePhase>);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.set(QueuePhase::Idle);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
