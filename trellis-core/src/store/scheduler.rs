//! Flush Scheduling
//!
//! A store never applies dispatched events on the spot. It asks its
//! [`Scheduler`] to run a flush later, and everything dispatched until then
//! is applied in that one flush.
//!
//! What "later" means is up to the scheduler:
//!
//! - [`Immediate`] runs the flush right away, so every dispatch outside of a
//!   running flush is applied before `dispatch` returns.
//! - [`ManualScheduler`] holds flushes until the caller drives it. Useful in
//!   tests and in hosts with their own frame loop.
//! - [`TokioScheduler`] spawns the flush onto the current `LocalSet`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

/// Work handed to a scheduler.
pub type Task = Box<dyn FnOnce()>;

/// Runs deferred work.
pub trait Scheduler {
    /// Run `task` at some later point (or now).
    fn defer(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn defer(&self, task: Task) {
        (**self).defer(task);
    }
}

/// Runs every task as soon as it is deferred.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn defer(&self, task: Task) {
        task();
    }
}

/// Holds tasks until the owner runs them.
#[derive(Default)]
pub struct ManualScheduler {
    pending: RefCell<VecDeque<Task>>,
}

impl ManualScheduler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Run the tasks that were pending when the call started.
    ///
    /// Tasks deferred meanwhile wait for the next call. Returns the number
    /// of tasks run.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<Task> = self.pending.borrow_mut().drain(..).collect();
        let count = batch.len();
        trace!(tasks = count, "running pending tasks");
        for task in batch {
            task();
        }
        count
    }

    /// Run tasks until nothing is pending. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        while self.pending() > 0 {
            total += self.run_pending();
        }
        total
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: Task) {
        self.pending.borrow_mut().push_back(task);
    }
}

impl Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Spawns each task onto the current tokio `LocalSet`.
///
/// Stores are single-threaded, so tasks are spawned with
/// [`tokio::task::spawn_local`].
///
/// # Panics
///
/// Deferring outside of a `LocalSet` panics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}
