//! Hand-driven graph nodes for unit tests.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::context::ContextStack;
use super::node::{subscribe_to, DependencyChanges, NodeCore, NodeKind, Source, SubContext};
use super::subscriber::{SubscriberId, Subscribers};
use super::ChangeHandler;

/// A source whose changes are published by hand.
pub struct TestSource {
    core: NodeCore,
    handlers: RefCell<Subscribers<Rc<dyn Any>>>,
}

impl TestSource {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            core: NodeCore::new(),
            handlers: RefCell::new(Subscribers::new()),
        })
    }

    pub fn publish(&self, value: i32) {
        let value: Rc<dyn Any> = Rc::new(value);
        let handlers = self.handlers.borrow().snapshot();
        for handler in handlers {
            handler(&value);
        }
    }
}

impl Source for TestSource {
    fn subscribe_erased(&self, handler: ChangeHandler) -> SubscriberId {
        self.handlers
            .borrow_mut()
            .insert(Rc::new(move |value: &Rc<dyn Any>| handler(Rc::clone(value))))
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.handlers.borrow_mut().remove(id);
    }

    fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }
}

impl SubContext for TestSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Reference
    }

    fn as_source(&self) -> Option<&dyn Source> {
        Some(self)
    }

    fn on_dependencies_changed(self: Rc<Self>, _changes: &DependencyChanges) {}
}

/// A consumer that counts its notifications.
pub struct Recorder {
    core: NodeCore,
    kind: NodeKind,
    notified: Cell<usize>,
    last: RefCell<DependencyChanges>,
}

impl Recorder {
    pub fn plain() -> Rc<Self> {
        Self::with_kind(NodeKind::Plain)
    }

    pub fn with_kind(kind: NodeKind) -> Rc<Self> {
        Rc::new(Self {
            core: NodeCore::new(),
            kind,
            notified: Cell::new(0),
            last: RefCell::new(DependencyChanges::default()),
        })
    }

    pub fn notified(&self) -> usize {
        self.notified.get()
    }

    pub fn last_changes(&self) -> DependencyChanges {
        self.last.borrow().clone()
    }
}

impl SubContext for Recorder {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn on_dependencies_changed(self: Rc<Self>, changes: &DependencyChanges) {
        self.notified.set(self.notified.get() + 1);
        *self.last.borrow_mut() = changes.clone();
    }
}

/// Register `source` as a dependency of whatever is evaluating.
pub fn read(source: &Rc<TestSource>) {
    if let Some(current) = ContextStack::peek() {
        let source: Rc<dyn SubContext> = source.clone();
        subscribe_to(&current, &source);
    }
}

/// A source that republishes whenever its own dependencies change, logging
/// its name to a shared log first.
pub struct Relay {
    core: NodeCore,
    name: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
    handlers: RefCell<Subscribers<Rc<dyn Any>>>,
}

impl Relay {
    pub fn new(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Self> {
        Rc::new(Self {
            core: NodeCore::new(),
            name,
            log: Rc::clone(log),
            handlers: RefCell::new(Subscribers::new()),
        })
    }
}

impl Source for Relay {
    fn subscribe_erased(&self, handler: ChangeHandler) -> SubscriberId {
        self.handlers
            .borrow_mut()
            .insert(Rc::new(move |value: &Rc<dyn Any>| handler(Rc::clone(value))))
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.handlers.borrow_mut().remove(id);
    }

    fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }
}

impl SubContext for Relay {
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
        self.log.borrow_mut().push(self.name);
        let value: Rc<dyn Any> = Rc::new(self.log.borrow().len());
        let handlers = self.handlers.borrow().snapshot();
        for handler in handlers {
            handler(&value);
        }
    }
}
