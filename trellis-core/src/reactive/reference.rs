//! Reference Implementation
//!
//! A Reference is a cached derived value. It runs its derivation lazily,
//! records every other reference read along the way as a dependency, and
//! recomputes when one of those dependencies reports a change.
//!
//! # How References Work
//!
//! 1. On `deref`, a reference with a cached value returns it. The node that
//!    is currently evaluating (if any) is still registered as a dependent,
//!    since reading the cache is reading the reference.
//!
//! 2. Without a cached value, the reference pushes itself onto the context
//!    stack and runs its derivation. Nested reads become its dependencies.
//!
//! 3. When a dependency changes, the reference re-derives and compares the
//!    new value with the old one. Only an actual change is passed on to its
//!    subscribers.
//!
//! 4. A reference caches durably only while somebody is subscribed. Once the
//!    last subscriber leaves, the cached value is dropped, the reference lets
//!    go of its own dependencies, and its eviction callback runs.
//!
//! # Why This Matters
//!
//! Nobody declares dependencies, and nobody has to clean them up: whatever a
//! derivation stops reading is unsubscribed after its next evaluation, and
//! whatever nobody reads any more is released.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::equality::{are_same, Cached};
use crate::graph::{
    subscribe_to, ChangeHandler, ContextGuard, ContextStack, DependencyChanges, NodeCore, NodeId,
    NodeKind, Source, SubContext, SubscriberId, Subscribers,
};

/// A lazily evaluated, cached derived value.
///
/// `Reference` is a cheap handle; clones share the same node.
///
/// # Type Parameters
///
/// - `V`: The derived value. `PartialEq` decides whether a recomputation
///   actually changed anything.
///
/// # Example
///
/// ```rust,ignore
/// let total = Reference::new(move || store.deref().items.len());
///
/// total.subscribe(|len| println!("now {len} items"));
/// ```
pub struct Reference<V>
where
    V: Clone + PartialEq + 'static,
{
    node: Rc<ReferenceNode<V>>,
}

struct ReferenceNode<V>
where
    V: Clone + PartialEq + 'static,
{
    core: NodeCore,

    /// Display name used in logs.
    name: RefCell<Option<String>>,

    derive: Box<dyn Fn() -> V>,

    /// Always re-derive on `deref`, even with a cached value.
    volatile: bool,

    last_value: RefCell<Cached<Rc<V>>>,

    subscribers: RefCell<Subscribers<Rc<V>>>,

    /// Runs whenever the subscriber set becomes empty.
    on_no_subscribers: RefCell<Option<Box<dyn Fn()>>>,

    evaluations: Cell<usize>,
}

impl<V> ReferenceNode<V>
where
    V: Clone + PartialEq + 'static,
{
    fn as_context(self: &Rc<Self>) -> Rc<dyn SubContext> {
        Rc::clone(self) as Rc<dyn SubContext>
    }

    fn cached(&self) -> Option<Rc<V>> {
        self.last_value.borrow().value().cloned()
    }

    /// Run the derivation with this node as the current context.
    fn evaluate(self: &Rc<Self>) -> Rc<V> {
        let value = {
            let _guard = ContextGuard::enter(self.as_context());
            Rc::new((self.derive)())
        };
        self.evaluations.set(self.evaluations.get() + 1);
        trace!(reference = %self.label(), "evaluated");

        *self.last_value.borrow_mut() = Cached::Value(Rc::clone(&value));
        value
    }

    fn deref(self: &Rc<Self>) -> Rc<V> {
        if let Some(current) = ContextStack::peek() {
            subscribe_to(&current, &self.as_context());
        }

        if !self.volatile {
            if let Some(value) = self.cached() {
                return value;
            }
        }

        let value = self.evaluate();
        if self.subscribers.borrow().is_empty() {
            // nobody will tell us when this goes stale
            self.release();
        }
        value
    }

    /// Drop the cached value and our own dependencies, then run the eviction
    /// callback.
    fn release(&self) {
        *self.last_value.borrow_mut() = Cached::Valueless;
        self.core.dispose();
        debug!(reference = %self.label(), "released");

        if let Some(callback) = self.on_no_subscribers.borrow().as_ref() {
            callback();
        }
    }
}

impl<V> Source for ReferenceNode<V>
where
    V: Clone + PartialEq + 'static,
{
    fn subscribe_erased(&self, handler: ChangeHandler) -> SubscriberId {
        self.subscribers
            .borrow_mut()
            .insert(Rc::new(move |value: &Rc<V>| {
                handler(Rc::clone(value) as Rc<dyn Any>)
            }))
    }

    fn unsubscribe(&self, id: SubscriberId) {
        let now_empty = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.remove(id) && subscribers.is_empty()
        };
        if now_empty {
            self.release();
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl<V> SubContext for ReferenceNode<V>
where
    V: Clone + PartialEq + 'static,
{
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Reference
    }

    fn as_source(&self) -> Option<&dyn Source> {
        Some(self)
    }

    fn on_dependencies_changed(self: Rc<Self>, _changes: &DependencyChanges) {
        if self.subscribers.borrow().is_empty() {
            trace!(reference = %self.label(), "no subscribers; skipping recompute");
            return;
        }

        let last = self.last_value.borrow_mut().take();
        let next = self.evaluate();

        if are_same(&last, &Cached::Value(Rc::clone(&next))) {
            trace!(reference = %self.label(), "value unchanged");
            return;
        }

        let handlers = self.subscribers.borrow().snapshot();
        trace!(reference = %self.label(), subscribers = handlers.len(), "value changed");
        for handler in handlers {
            handler(&next);
        }
    }

    fn label(&self) -> String {
        match self.name.borrow().as_deref() {
            Some(name) => format!("Reference({name})"),
            None => format!("Reference#{}", self.core.id().raw()),
        }
    }
}

impl<V> Reference<V>
where
    V: Clone + PartialEq + 'static,
{
    /// Create a reference over the given derivation.
    ///
    /// The derivation is not run until the first `deref` or `subscribe`.
    pub fn new<F>(derive: F) -> Self
    where
        F: Fn() -> V + 'static,
    {
        Self::build(derive, false)
    }

    /// Create a reference that re-derives on every `deref`.
    ///
    /// Used for derivations whose inputs depend on the calling context
    /// rather than on other references alone.
    pub(crate) fn volatile<F>(derive: F) -> Self
    where
        F: Fn() -> V + 'static,
    {
        Self::build(derive, true)
    }

    fn build<F>(derive: F, volatile: bool) -> Self
    where
        F: Fn() -> V + 'static,
    {
        Self {
            node: Rc::new(ReferenceNode {
                core: NodeCore::new(),
                name: RefCell::new(None),
                derive: Box::new(derive),
                volatile,
                last_value: RefCell::new(Cached::Valueless),
                subscribers: RefCell::new(Subscribers::new()),
                on_no_subscribers: RefCell::new(None),
                evaluations: Cell::new(0),
            }),
        }
    }

    /// Give the reference a display name.
    pub fn named(self, name: impl Into<String>) -> Self {
        *self.node.name.borrow_mut() = Some(name.into());
        self
    }

    /// Display name, e.g. `Reference(ships)`.
    pub fn name(&self) -> String {
        self.node.label()
    }

    pub fn id(&self) -> NodeId {
        self.node.core.id()
    }

    /// Get the current value, deriving it if nothing is cached.
    ///
    /// If called while another node is evaluating, that node becomes a
    /// subscriber of this reference.
    ///
    /// # Panics
    ///
    /// Panics raised by the derivation propagate to the caller.
    pub fn deref(&self) -> V {
        V::clone(&self.node.deref())
    }

    /// Register a change handler.
    ///
    /// The handler runs with the new value whenever a recomputation produces
    /// a value different from the previous one. Subscribing to a reference
    /// that has nothing cached evaluates it right away so that it starts
    /// tracking its dependencies.
    pub fn subscribe<F>(&self, on_change: F) -> SubscriberId
    where
        F: Fn(&V) + 'static,
    {
        let id = self
            .node
            .subscribers
            .borrow_mut()
            .insert(Rc::new(move |value: &Rc<V>| on_change(&**value)));

        if self.node.cached().is_none() {
            self.node.evaluate();
        }
        id
    }

    /// Remove a change handler.
    ///
    /// Removing the last handler invalidates the cached value and releases
    /// the reference.
    pub fn unsubscribe(&self, id: SubscriberId) {
        Source::unsubscribe(&*self.node, id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.borrow().len()
    }

    /// Number of sources read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.node.core.subscription_count()
    }

    pub fn depends_on(&self, source: NodeId) -> bool {
        self.node.core.is_subscribed_to(source)
    }

    pub fn has_value(&self) -> bool {
        !self.node.last_value.borrow().is_valueless()
    }

    /// Number of times the derivation has run.
    pub fn evaluation_count(&self) -> usize {
        self.node.evaluations.get()
    }

    /// Whether two handles point at the same reference.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.node, &b.node)
    }

    /// The reference as a graph node.
    pub fn as_context(&self) -> Rc<dyn SubContext> {
        self.node.as_context()
    }

    /// Bind the reference to a store so the store can be found from inside
    /// its evaluation.
    pub(crate) fn bind_store(&self, store: Weak<dyn Any>) {
        self.node.core.bind_store(store);
    }

    /// Set the callback run whenever the subscriber set becomes empty.
    pub(crate) fn on_no_subscribers<F>(&self, callback: F)
    where
        F: Fn() + 'static,
    {
        *self.node.on_no_subscribers.borrow_mut() = Some(Box::new(callback));
    }
}

impl<V> Clone for Reference<V>
where
    V: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<V> Debug for Reference<V>
where
    V: Clone + PartialEq + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("name", &self.name())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::notify_changes_batched;

    /// A reference over a plain cell, standing in for a store.
    fn cell_reference(cell: &Rc<RefCell<i32>>) -> Reference<i32> {
        let cell = Rc::clone(cell);
        Reference::new(move || *cell.borrow())
    }

    /// Tell a root reference that its input changed.
    fn poke(root: &Reference<i32>) {
        notify_changes_batched(&root.as_context());
    }

    #[test]
    fn reference_computes_on_first_access() {
        let call_count = Rc::new(Cell::new(0));
        let call_count_clone = call_count.clone();

        let reference = Reference::new(move || {
            call_count_clone.set(call_count_clone.get() + 1);
            42
        });

        // not computed yet
        assert!(!reference.has_value());
        assert_eq!(call_count.get(), 0);

        assert_eq!(reference.deref(), 42);
        assert_eq!(call_count.get(), 1);
    }

    #[test]
    fn unsubscribed_reference_does_not_keep_its_value() {
        let reference = Reference::new(|| 42);

        assert_eq!(reference.deref(), 42);
        assert!(!reference.has_value());

        assert_eq!(reference.deref(), 42);
        assert_eq!(reference.evaluation_count(), 2);
    }

    #[test]
    fn subscribed_reference_caches() {
        let call_count = Rc::new(Cell::new(0));
        let call_count_clone = call_count.clone();

        let reference = Reference::new(move || {
            call_count_clone.set(call_count_clone.get() + 1);
            42
        });
        reference.subscribe(|_| {});

        // subscribing evaluated it once
        assert_eq!(call_count.get(), 1);

        assert_eq!(reference.deref(), 42);
        assert_eq!(reference.deref(), 42);
        assert_eq!(reference.deref(), 42);
        assert_eq!(call_count.get(), 1);
    }

    #[test]
    fn reading_a_reference_inside_another_subscribes() {
        let inner = Reference::new(|| 20);
        let inner_clone = inner.clone();
        let outer = Reference::new(move || inner_clone.deref() + 1);

        outer.subscribe(|_| {});

        assert_eq!(outer.deref(), 21);
        assert_eq!(inner.subscriber_count(), 1);
        assert!(outer.depends_on(inner.id()));
    }

    #[test]
    fn releasing_the_last_subscriber_cascades() {
        let evicted = Rc::new(Cell::new(false));
        let evicted_clone = evicted.clone();

        let inner = Reference::new(|| 20);
        inner.on_no_subscribers(move || evicted_clone.set(true));
        let inner_clone = inner.clone();
        let outer = Reference::new(move || inner_clone.deref() + 1);

        let id = outer.subscribe(|_| {});
        assert!(inner.has_value());

        outer.unsubscribe(id);

        assert!(!outer.has_value());
        assert!(!inner.has_value());
        assert_eq!(inner.subscriber_count(), 0);
        assert!(evicted.get());
    }

    #[test]
    fn changes_propagate_to_subscribers() {
        let cell = Rc::new(RefCell::new(1));
        let root = cell_reference(&cell);
        let root_clone = root.clone();
        let doubled = Reference::new(move || root_clone.deref() * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        doubled.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        *cell.borrow_mut() = 5;
        poke(&root);

        assert_eq!(*seen.borrow(), vec![10]);
        assert_eq!(doubled.deref(), 10);
    }

    #[test]
    fn equal_recomputation_does_not_notify() {
        let cell = Rc::new(RefCell::new(2));
        let root = cell_reference(&cell);
        let root_clone = root.clone();
        let parity = Reference::new(move || root_clone.deref() % 2);

        let call_count = Rc::new(Cell::new(0));
        let call_count_clone = call_count.clone();
        parity.subscribe(move |_| call_count_clone.set(call_count_clone.get() + 1));

        *cell.borrow_mut() = 4;
        poke(&root);

        // recomputed, but to the same value
        assert_eq!(parity.evaluation_count(), 2);
        assert_eq!(call_count.get(), 0);

        *cell.borrow_mut() = 7;
        poke(&root);
        assert_eq!(call_count.get(), 1);
    }

    #[test]
    fn reference_without_subscribers_ignores_changes() {
        let cell = Rc::new(RefCell::new(1));
        let root = cell_reference(&cell);

        poke(&root);
        assert_eq!(root.evaluation_count(), 0);
    }

    #[test]
    fn panicking_derivation_leaves_no_context_behind() {
        let reference: Reference<i32> = Reference::new(|| panic!("boom"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| reference.deref()));

        assert!(result.is_err());
        assert!(!ContextStack::is_active());
        assert!(!reference.has_value());
    }

    #[test]
    fn names_show_up_in_labels() {
        let reference = Reference::new(|| 1).named("ships");
        assert_eq!(reference.name(), "Reference(ships)");

        let anonymous = Reference::new(|| 1);
        assert!(anonymous.name().starts_with("Reference#"));
    }

    #[test]
    fn clone_shares_state() {
        let reference = Reference::new(|| 42);
        let other = reference.clone();

        reference.subscribe(|_| {});
        assert!(Reference::ptr_eq(&reference, &other));
        assert!(other.has_value());
        assert_eq!(other.subscriber_count(), 1);
    }
}
