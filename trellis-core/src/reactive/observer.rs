//! Observer Implementation
//!
//! An Observer is a plain graph node that reads references and gets told when
//! they change. It is the consumer end of the graph, the place where UI
//! bindings or other side effects hook in.
//!
//! Unlike a [`Reference`](super::Reference), an observer is never read by
//! anybody, so it is neither cached nor subscribable.
//!
//! # Example
//!
//! ```rust,ignore
//! let view = Observer::new(|changes| render(changes));
//! view.bind_store(&store);
//!
//! view.track(|| {
//!     let ships = ships_ref.deref();
//!     let crew = crew_ref.deref();
//! });
//! // `view` is now notified once per propagation in which ships or crew
//! // actually changed.
//! ```

use std::cell::Cell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

use crate::graph::{with_context, DependencyChanges, NodeCore, NodeId, SubContext};
use crate::store::Store;

/// A consumer node that is notified when the references it read change.
pub struct Observer {
    core: NodeCore,
    on_change: Box<dyn Fn(&DependencyChanges)>,
    notify_count: Cell<usize>,
    disposed: Cell<bool>,
}

impl Observer {
    /// Create an observer with the given change callback.
    ///
    /// The callback receives the new values of every dependency that changed
    /// since the last notification.
    pub fn new<F>(on_change: F) -> Rc<Self>
    where
        F: Fn(&DependencyChanges) + 'static,
    {
        Rc::new(Self {
            core: NodeCore::new(),
            on_change: Box::new(on_change),
            notify_count: Cell::new(0),
            disposed: Cell::new(false),
        })
    }

    /// Make `store` the one that root references resolve to while this
    /// observer is tracking.
    pub fn bind_store<V>(&self, store: &Store<V>)
    where
        V: Clone + PartialEq + 'static,
    {
        self.core.bind_store(store.binding());
    }

    /// Run `f` with this observer as the current context.
    ///
    /// Every reference read inside `f` becomes a dependency; dependencies of
    /// an earlier `track` that `f` no longer reads are dropped. A disposed
    /// observer runs `f` untracked.
    pub fn track<R>(self: &Rc<Self>, f: impl FnOnce() -> R) -> R {
        if self.disposed.get() {
            return f();
        }
        let node: Rc<dyn SubContext> = Rc::clone(self) as Rc<dyn SubContext>;
        with_context(&node, f)
    }

    /// Stop receiving notifications and release all dependencies.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.core.dispose();
        trace!(observer = %self.label(), "disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Number of notifications received.
    pub fn notify_count(&self) -> usize {
        self.notify_count.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.core.subscription_count()
    }

    pub fn depends_on(&self, source: NodeId) -> bool {
        self.core.is_subscribed_to(source)
    }

    pub fn id(&self) -> NodeId {
        self.core.id()
    }
}

impl SubContext for Observer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn on_dependencies_changed(self: Rc<Self>, changes: &DependencyChanges) {
        if self.disposed.get() {
            return;
        }
        self.notify_count.set(self.notify_count.get() + 1);
        (self.on_change)(changes);
    }

    fn label(&self) -> String {
        format!("Observer#{}", self.core.id().raw())
    }
}

impl Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.core.id())
            .field("dependency_count", &self.dependency_count())
            .field("notify_count", &self.notify_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
