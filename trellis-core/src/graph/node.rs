//! Graph Nodes
//!
//! Every node in the computation graph (stores, references, observers)
//! shares one piece of bookkeeping, [`NodeCore`], and implements the
//! [`SubContext`] trait on top of it.
//!
//! # How Subscriptions Are Maintained
//!
//! 1. When a node enters an evaluation pass, every current subscription is
//!    copied into `prior_subscriptions`.
//!
//! 2. Each source read during the pass calls [`subscribe_to`]. A source the
//!    node is already subscribed to is struck from `prior_subscriptions`;
//!    a new source gets a change handler.
//!
//! 3. When the pass exits, whatever is left in `prior_subscriptions` was not
//!    read this time and is unsubscribed.
//!
//! # Batching
//!
//! A node with a single upstream source is notified as soon as that source
//! changes. A node with several sources instead registers itself with the
//! outermost active context, which notifies each pending node once after it
//! has finished propagating. This keeps diamond-shaped graphs from notifying
//! the bottom node once per edge.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::trace;

use super::context::ContextStack;
use super::subscriber::SubscriberId;

/// Unique identifier for a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The evaluation context of a store. It owns state rather than depending
    /// on anything, so it never records subscriptions and is never a source.
    Store,

    /// A cached derived value. References both depend on other nodes and
    /// publish changes to their own subscribers.
    Reference,

    /// A consumer that depends on other nodes but publishes nothing, such as
    /// a UI binding.
    Plain,
}

/// Handler registered with an upstream source on behalf of a downstream node.
///
/// The value is the source's new value, type-erased.
pub type ChangeHandler = Rc<dyn Fn(Rc<dyn Any>)>;

/// Publish/subscribe capability of a node.
pub trait Source {
    /// Register a type-erased change handler.
    fn subscribe_erased(&self, handler: ChangeHandler) -> SubscriberId;

    /// Remove a previously registered handler.
    fn unsubscribe(&self, id: SubscriberId);

    /// Number of handlers currently registered.
    fn subscriber_count(&self) -> usize;
}

/// A node that can be pushed onto the evaluation context stack.
pub trait SubContext: 'static {
    /// Shared subscription bookkeeping.
    fn core(&self) -> &NodeCore;

    fn kind(&self) -> NodeKind {
        NodeKind::Plain
    }

    /// Returns the node's publish/subscribe interface, if it has one.
    fn as_source(&self) -> Option<&dyn Source> {
        None
    }

    /// Called when the node is pushed onto the context stack.
    fn on_enter(&self) {
        self.core().on_enter();
    }

    /// Called when the node is popped from the context stack.
    fn on_exit(&self) {
        self.core().on_exit();
    }

    /// Called once the node's dependencies have changed.
    ///
    /// `changes` maps each upstream source that reported a new value since
    /// it was last read to that value.
    fn on_dependencies_changed(self: Rc<Self>, changes: &DependencyChanges);

    /// Human-readable name used in logs.
    fn label(&self) -> String {
        format!("{:?}#{}", self.kind(), self.core().id().raw())
    }
}

/// Values reported by upstream sources, keyed by source node.
#[derive(Clone, Default)]
pub struct DependencyChanges {
    values: IndexMap<NodeId, Rc<dyn Any>>,
}

impl DependencyChanges {
    /// Get the value reported by `source`, if it reported one of type `T`.
    pub fn get<T: 'static>(&self, source: NodeId) -> Option<&T> {
        self.values
            .get(&source)
            .and_then(|value| (**value).downcast_ref::<T>())
    }

    pub fn contains(&self, source: NodeId) -> bool {
        self.values.contains_key(&source)
    }

    /// The sources that reported values, in the order they reported.
    pub fn sources(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, source: NodeId, value: Rc<dyn Any>) {
        self.values.insert(source, value);
    }

    fn remove(&mut self, source: NodeId) {
        self.values.shift_remove(&source);
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for DependencyChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// An active subscription to an upstream source.
///
/// Holding the source keeps it alive while this node depends on it; the
/// source only holds a weak handle back.
struct Subscription {
    source: Rc<dyn SubContext>,
    subscriber: SubscriberId,
}

impl Subscription {
    fn release(self) {
        if let Some(source) = self.source.as_source() {
            source.unsubscribe(self.subscriber);
        }
    }
}

/// Subscription bookkeeping shared by every graph node.
pub struct NodeCore {
    id: NodeId,

    /// Upstream sources this node currently depends on.
    subscriptions: RefCell<IndexMap<NodeId, Subscription>>,

    /// Sources not yet re-read during the current pass.
    prior_subscriptions: RefCell<IndexSet<NodeId>>,

    /// Latest value reported by each source since it was last read.
    dependency_values: RefCell<DependencyChanges>,

    /// Downstream nodes waiting to be notified once this node finishes
    /// propagating.
    pending_batchers: RefCell<IndexMap<NodeId, Weak<dyn SubContext>>>,

    /// The store this node is bound to, if any.
    owning_store: RefCell<Option<Weak<dyn Any>>>,
}

impl NodeCore {
    pub fn new() -> Self {
        Self {
            id: NodeId::new(),
            subscriptions: RefCell::new(IndexMap::new()),
            prior_subscriptions: RefCell::new(IndexSet::new()),
            dependency_values: RefCell::new(DependencyChanges::default()),
            pending_batchers: RefCell::new(IndexMap::new()),
            owning_store: RefCell::new(None),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Prepare for a pass: every current subscription is presumed stale until
    /// it is read again.
    pub fn on_enter(&self) {
        let subscriptions = self.subscriptions.borrow();
        self.prior_subscriptions
            .borrow_mut()
            .extend(subscriptions.keys().copied());
    }

    /// Finish a pass: drop subscriptions that were not read again.
    pub fn on_exit(&self) {
        let stale: SmallVec<[NodeId; 4]> = self.prior_subscriptions.borrow_mut().drain(..).collect();
        if stale.is_empty() {
            return;
        }

        let removed: SmallVec<[Subscription; 4]> = {
            let mut subscriptions = self.subscriptions.borrow_mut();
            stale
                .iter()
                .filter_map(|id| subscriptions.shift_remove(id))
                .collect()
        };
        {
            let mut values = self.dependency_values.borrow_mut();
            for id in &stale {
                values.remove(*id);
            }
        }

        for subscription in removed {
            trace!(node = self.id.raw(), source = %subscription.source.label(), "pruned stale subscription");
            subscription.release();
        }
    }

    /// Unsubscribe from every upstream source.
    pub fn dispose(&self) {
        self.prior_subscriptions.borrow_mut().clear();
        self.dependency_values.borrow_mut().clear();

        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        for (_, subscription) in subscriptions {
            subscription.release();
        }
    }

    /// Number of upstream sources this node depends on.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    pub fn is_subscribed_to(&self, source: NodeId) -> bool {
        self.subscriptions.borrow().contains_key(&source)
    }

    /// Values reported by upstream sources since they were last read.
    pub fn dependency_values(&self) -> DependencyChanges {
        self.dependency_values.borrow().clone()
    }

    /// Ask to be notified once this node has finished propagating.
    ///
    /// A node asking itself is ignored.
    pub fn request_batched_changes(&self, node: &Rc<dyn SubContext>) {
        let id = node.core().id();
        if id == self.id {
            return;
        }
        self.pending_batchers
            .borrow_mut()
            .insert(id, Rc::downgrade(node));
    }

    pub fn pending_batcher_count(&self) -> usize {
        self.pending_batchers.borrow().len()
    }

    /// Bind this node to a store.
    pub fn bind_store(&self, store: Weak<dyn Any>) {
        *self.owning_store.borrow_mut() = Some(store);
    }

    /// The store this node is bound to, if it is still alive.
    pub fn store(&self) -> Option<Rc<dyn Any>> {
        self.owning_store.borrow().as_ref().and_then(Weak::upgrade)
    }
}

impl Default for NodeCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NodeCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("subscriptions", &self.subscriptions.borrow().keys().collect::<Vec<_>>())
            .field("pending_batchers", &self.pending_batcher_count())
            .finish()
    }
}

/// Make `node` depend on `source`.
///
/// Does nothing if `source` cannot publish changes or `node` is a store
/// context. Re-reading a source that is already subscribed marks the
/// subscription as still wanted for the current pass.
pub fn subscribe_to(node: &Rc<dyn SubContext>, source: &Rc<dyn SubContext>) {
    if node.kind() == NodeKind::Store {
        return;
    }
    let Some(publisher) = source.as_source() else {
        return;
    };

    let core = node.core();
    let source_id = source.core().id();
    if source_id == core.id() {
        return;
    }

    if core.is_subscribed_to(source_id) {
        core.prior_subscriptions.borrow_mut().shift_remove(&source_id);
        core.dependency_values.borrow_mut().remove(source_id);
        return;
    }

    let weak = Rc::downgrade(node);
    let handler: ChangeHandler = Rc::new(move |value| {
        if let Some(node) = weak.upgrade() {
            dependency_changed(&node, source_id, value);
        }
    });
    let subscriber = publisher.subscribe_erased(handler);

    trace!(node = %node.label(), source = %source.label(), "subscribed");
    core.subscriptions.borrow_mut().insert(
        source_id,
        Subscription {
            source: Rc::clone(source),
            subscriber,
        },
    );
}

fn dependency_changed(node: &Rc<dyn SubContext>, source: NodeId, value: Rc<dyn Any>) {
    let core = node.core();
    core.dependency_values.borrow_mut().insert(source, value);

    if core.subscription_count() <= 1 {
        notify_changes_batched(node);
        return;
    }

    match ContextStack::root() {
        Some(root) => {
            trace!(node = %node.label(), root = %root.label(), "deferring to batched notification");
            root.core().request_batched_changes(node);
        }
        None => notify_changes_batched(node),
    }
}

/// Run the node's change hook, then flush every node that asked to be
/// notified through it.
pub fn notify_changes_batched(node: &Rc<dyn SubContext>) {
    let changes = node.core().dependency_values();
    Rc::clone(node).on_dependencies_changed(&changes);
    dispatch_changes_batched(node);
}

/// Notify every pending batcher of `node`, once each.
///
/// Batchers are taken upstream first: a batcher waits while another pending
/// batcher sits anywhere above it, so it never reads a value that is still
/// about to change. Notifying a batcher can queue further batchers, so this
/// repeats until the pending set stays empty.
pub fn dispatch_changes_batched(node: &Rc<dyn SubContext>) {
    while let Some(target) = next_batcher(node.core()) {
        trace!(node = %target.label(), "notifying batched node");
        notify_changes_batched(&target);
    }
}

/// Remove and return the next batcher that has no pending batcher upstream.
fn next_batcher(core: &NodeCore) -> Option<Rc<dyn SubContext>> {
    let mut pending = core.pending_batchers.borrow_mut();
    loop {
        let (_, weak) = pending.first()?;
        let Some(mut target) = weak.upgrade() else {
            pending.shift_remove_index(0);
            continue;
        };

        let mut visited = IndexSet::new();
        while let Some(upstream) = pending_upstream(target.core(), &pending, &mut visited) {
            target = upstream;
        }

        pending.shift_remove(&target.core().id());
        return Some(target);
    }
}

/// Depth-first search above `core` for a node still waiting in `pending`.
///
/// Nodes in `visited` are skipped; a node fully searched without a hit has
/// no pending node above it either.
fn pending_upstream(
    core: &NodeCore,
    pending: &IndexMap<NodeId, Weak<dyn SubContext>>,
    visited: &mut IndexSet<NodeId>,
) -> Option<Rc<dyn SubContext>> {
    let sources: SmallVec<[Rc<dyn SubContext>; 4]> = core
        .subscriptions
        .borrow()
        .values()
        .map(|subscription| Rc::clone(&subscription.source))
        .collect();

    for source in sources {
        let id = source.core().id();
        if !visited.insert(id) {
            continue;
        }
        if pending.contains_key(&id) {
            return Some(source);
        }
        if let Some(found) = pending_upstream(source.core(), pending, visited) {
            return Some(found);
        }
    }
    None
}
