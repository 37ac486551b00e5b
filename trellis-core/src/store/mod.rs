//! Stores
//!
//! A Store owns a piece of state and is the only thing in the graph that ever
//! changes on its own. Everything else is derived from stores.
//!
//! # How Stores Work
//!
//! 1. Events are dispatched to the store. They are queued and applied
//!    together in one flush (see [`QueuePhase`] for the queue's states).
//!
//! 2. The flush folds the queued events over a copy of the state and loads
//!    the result.
//!
//! 3. Loading a new state re-derives the store's root reference under the
//!    store's own context. The context becomes the root of the context stack,
//!    so that every node with several changed dependencies is notified once,
//!    after the propagation has finished.
//!
//! # Scope
//!
//! Stores bind themselves to the graph nodes they create. A
//! [`sub_root`](crate::reactive::sub_root) reference finds the nearest store
//! of its state type by walking the context stack, so the same derivation can
//! run against different stores.

pub mod effects;
pub mod events;

mod compose;
mod options;
mod queue;
mod scheduler;

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::graph::{
    dispatch_changes_batched, notify_changes_batched, with_context, ContextStack,
    DependencyChanges, NodeCore, NodeKind, SubContext,
};
use crate::reactive::Reference;
use queue::DispatchQueue;

pub use compose::{compose_stores, compose_stores_with_options, ComposedState, ComposedStore};
pub use options::{CopyState, ProcessQueue, StoreOptions};
pub use queue::{fold_events, QueuePhase};
pub use scheduler::{Immediate, ManualScheduler, Scheduler, Task, TokioScheduler};

/// An update function.
///
/// Receives the current state and the store it runs against, and returns the
/// next state, or `None` to leave the state alone.
pub type StoreEvent<V> = Box<dyn FnOnce(&V, &dyn StateStore<V>) -> Option<V>>;

/// The operations every store supports.
///
/// Events receive the store as `&dyn StateStore<V>`, so they can read it or
/// dispatch follow-up events.
pub trait StateStore<V: 'static> {
    /// Queue an event for the next flush.
    fn dispatch(&self, event: StoreEvent<V>);

    /// Apply an event right now.
    ///
    /// Fails with [`Error::IllegalReentrantDispatch`] while a flush is
    /// running.
    fn dispatch_sync(&self, event: StoreEvent<V>) -> Result<()>;

    /// A copy of the current state.
    fn get_snapshot(&self) -> V;

    /// Replace the state and propagate the change.
    fn load_snapshot(&self, snapshot: V);

    /// Read the state through the store's root reference.
    fn deref(&self) -> V;
}

/// The context a store propagates changes under.
///
/// Being a store node, it never subscribes to anything.
pub(crate) struct StoreContext {
    core: NodeCore,
}

impl StoreContext {
    pub(crate) fn new(binding: Weak<dyn Any>) -> Rc<Self> {
        let context = Rc::new(Self {
            core: NodeCore::new(),
        });
        context.core.bind_store(binding);
        context
    }
}

impl SubContext for StoreContext {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Store
    }

    fn on_dependencies_changed(self: Rc<Self>, _changes: &DependencyChanges) {
        // unreachable: store nodes have no dependencies
    }

    fn label(&self) -> String {
        format!("StoreContext#{}", self.core.id().raw())
    }
}

/// Re-derive `root` under `context` and flush the batched notifications.
pub(crate) fn propagate(context: &Rc<dyn SubContext>, root: &Rc<dyn SubContext>) {
    with_context(context, || {
        notify_changes_batched(root);
        if let Some(scope_root) = ContextStack::root() {
            dispatch_changes_batched(&scope_root);
        }
    });
}

struct StoreInner<V>
where
    V: Clone + PartialEq + 'static,
{
    state: Rc<RefCell<V>>,
    root: Reference<V>,
    context: Rc<StoreContext>,
    queue: Rc<DispatchQueue<V>>,
}

impl<V> StoreInner<V>
where
    V: Clone + PartialEq + 'static,
{
    fn commit(&self, snapshot: V) {
        *self.state.borrow_mut() = snapshot;
        debug!(store = %self.context.label(), "state loaded");

        let context: Rc<dyn SubContext> = Rc::clone(&self.context) as Rc<dyn SubContext>;
        propagate(&context, &self.root.as_context());
    }
}

impl<V> StateStore<V> for StoreInner<V>
where
    V: Clone + PartialEq + 'static,
{
    fn dispatch(&self, event: StoreEvent<V>) {
        self.queue.enqueue(event);
    }

    fn dispatch_sync(&self, event: StoreEvent<V>) -> Result<()> {
        self.queue.apply_now(self, event)
    }

    fn get_snapshot(&self) -> V {
        self.state.borrow().clone()
    }

    fn load_snapshot(&self, snapshot: V) {
        self.commit(snapshot);
    }

    fn deref(&self) -> V {
        self.root.deref()
    }
}

/// A container of state that derived references are computed from.
///
/// `Store` is a cheap handle; clones share the same state.
///
/// # Example
///
/// ```rust,ignore
/// let store = Store::new(Crew::default());
///
/// let captain = Reference::new({
///     let store = store.clone();
///     move || store.deref().captain
/// });
///
/// store.dispatch(update(|crew: &Crew| crew.promote("zoe")));
/// ```
pub struct Store<V>
where
    V: Clone + PartialEq + 'static,
{
    inner: Rc<StoreInner<V>>,
}

impl<V> Store<V>
where
    V: Clone + PartialEq + 'static,
{
    /// Create a store with immediate scheduling.
    pub fn new(initial: V) -> Self {
        Self::with_options(initial, StoreOptions::default())
    }

    pub fn with_options(initial: V, options: StoreOptions<V>) -> Self {
        let state = Rc::new(RefCell::new(initial));

        let inner = Rc::new_cyclic(|weak: &Weak<StoreInner<V>>| {
            let binding: Weak<dyn Any> = weak.clone();
            let target: Weak<dyn StateStore<V>> = weak.clone();

            let cell = Rc::clone(&state);
            let root = Reference::new(move || cell.borrow().clone()).named("@store");
            root.bind_store(binding.clone());

            StoreInner {
                state,
                root,
                context: StoreContext::new(binding),
                queue: DispatchQueue::new(target, options),
            }
        });

        trace!(store = %inner.context.label(), "store created");
        Self { inner }
    }

    /// Read the state through the root reference.
    ///
    /// Inside an evaluation, the evaluating node subscribes to the store.
    pub fn deref(&self) -> V {
        self.inner.root.deref()
    }

    /// The reference every read of this store goes through.
    pub fn root(&self) -> Reference<V> {
        self.inner.root.clone()
    }

    pub fn get_snapshot(&self) -> V {
        self.inner.get_snapshot()
    }

    /// Replace the state and propagate to every subscriber.
    pub fn load_snapshot(&self, snapshot: V) {
        self.inner.commit(snapshot);
    }

    /// Queue an event for the next flush.
    pub fn dispatch<F>(&self, event: F)
    where
        F: FnOnce(&V, &dyn StateStore<V>) -> Option<V> + 'static,
    {
        self.inner.queue.enqueue(Box::new(event));
    }

    /// Apply an event right now, bypassing the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalReentrantDispatch`] if called from an event
    /// while a flush is running.
    pub fn dispatch_sync<F>(&self, event: F) -> Result<()>
    where
        F: FnOnce(&V, &dyn StateStore<V>) -> Option<V> + 'static,
    {
        self.inner.queue.apply_now(&*self.inner, Box::new(event))
    }

    /// Run `f` with this store's context on the stack.
    ///
    /// Root references read inside `f` resolve to this store.
    pub fn with_context<R>(&self, f: impl FnOnce() -> R) -> R {
        let context: Rc<dyn SubContext> = Rc::clone(&self.inner.context) as Rc<dyn SubContext>;
        with_context(&context, f)
    }

    /// The nearest store of this state type bound to the context stack.
    ///
    /// # Errors
    ///
    /// [`Error::MissingStoreInScope`] if no store is bound at all, and
    /// [`Error::StoreTypeMismatch`] if only stores of other types are.
    pub fn in_scope() -> Result<Self> {
        let stores = ContextStack::stores();
        if stores.is_empty() {
            return Err(Error::MissingStoreInScope);
        }

        stores
            .into_iter()
            .find_map(|store| store.downcast::<StoreInner<V>>().ok())
            .map(|inner| Self { inner })
            .ok_or(Error::StoreTypeMismatch {
                expected: type_name::<V>(),
            })
    }

    pub fn queue_phase(&self) -> QueuePhase {
        self.inner.queue.phase()
    }

    /// Number of events waiting for the next flush.
    pub fn pending_events(&self) -> usize {
        self.inner.queue.len()
    }

    /// The store as a graph node.
    pub fn context(&self) -> Rc<dyn SubContext> {
        Rc::clone(&self.inner.context) as Rc<dyn SubContext>
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn binding(&self) -> Weak<dyn Any> {
        let weak: Weak<StoreInner<V>> = Rc::downgrade(&self.inner);
        weak
    }
}

impl<V> StateStore<V> for Store<V>
where
    V: Clone + PartialEq + 'static,
{
    fn dispatch(&self, event: StoreEvent<V>) {
        self.inner.dispatch(event);
    }

    fn dispatch_sync(&self, event: StoreEvent<V>) -> Result<()> {
        self.inner.dispatch_sync(event)
    }

    fn get_snapshot(&self) -> V {
        self.inner.get_snapshot()
    }

    fn load_snapshot(&self, snapshot: V) {
        self.inner.commit(snapshot);
    }

    fn deref(&self) -> V {
        self.inner.root.deref()
    }
}

impl<V> Clone for Store<V>
where
    V: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> Debug for Store<V>
where
    V: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.inner.state.borrow())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
