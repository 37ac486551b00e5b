//! Evaluation Context Stack
//!
//! The context stack tracks which node is currently evaluating. This enables
//! automatic dependency tracking: when a reference is read, the node on top
//! of the stack subscribes to it.
//!
//! # Implementation
//!
//! We use a thread-local stack of graph nodes. Entering an evaluation pushes
//! the node (running its enter hook); leaving pops it (running its exit hook,
//! which prunes subscriptions the pass did not touch). Pushes and pops must
//! nest; [`ContextGuard`] ties the pop to a scope so that it also happens when
//! a derivation panics.
//!
//! The bottom of the stack is the *root* context. Nodes with several
//! dependencies hand their notifications to the root so that they are
//! delivered once, after the root has finished propagating.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::{error, trace};

use super::node::{subscribe_to, SubContext};
use crate::error::{Error, Result};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Rc<dyn SubContext>>> = RefCell::new(Vec::new());
}

/// Accessors for the thread's evaluation context stack.
pub struct ContextStack;

impl ContextStack {
    /// The innermost active context, if any.
    pub fn peek() -> Option<Rc<dyn SubContext>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// The outermost active context, if any.
    pub fn root() -> Option<Rc<dyn SubContext>> {
        CONTEXT_STACK.with(|stack| stack.borrow().first().cloned())
    }

    /// Check if there is an active context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Run the node's enter hook and make it the current context.
    pub fn push(node: Rc<dyn SubContext>) {
        trace!(node = %node.label(), depth = Self::depth(), "enter context");
        node.on_enter();
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(node));
    }

    /// Run the node's exit hook and remove it from the top of the stack.
    ///
    /// Fails without touching the stack if `node` is not on top.
    pub fn pop(node: &Rc<dyn SubContext>) -> Result<()> {
        let expected = node.core().id();
        let found = CONTEXT_STACK.with(|stack| stack.borrow().last().map(|top| top.core().id()));
        if found != Some(expected) {
            return Err(Error::UnbalancedContextStack { expected, found });
        }

        node.on_exit();
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        trace!(node = %node.label(), depth = Self::depth(), "exit context");
        drop(popped);
        Ok(())
    }

    /// Stores bound to active contexts, nearest first.
    pub fn stores() -> Vec<Rc<dyn Any>> {
        let nodes = CONTEXT_STACK.with(|stack| stack.borrow().clone());
        nodes
            .iter()
            .rev()
            .filter_map(|node| node.core().store())
            .collect()
    }
}

/// Guard that pops its context when dropped.
pub struct ContextGuard {
    node: Rc<dyn SubContext>,
}

impl ContextGuard {
    /// Push `node`; it is popped again when the guard drops.
    pub fn enter(node: Rc<dyn SubContext>) -> Self {
        ContextStack::push(Rc::clone(&node));
        Self { node }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Err(err) = ContextStack::pop(&self.node) {
            if std::thread::panicking() {
                error!(%err, "context stack unbalanced while unwinding");
            } else {
                panic!("{err}");
            }
        }
    }
}

/// Evaluate `f` with `node` as the current context.
///
/// The context that was current before becomes a dependent of `node`, since
/// the stack is depth-first: whoever is evaluating asked for `node`'s value.
pub fn with_context<R>(node: &Rc<dyn SubContext>, f: impl FnOnce() -> R) -> R {
    if let Some(current) = ContextStack::peek() {
        subscribe_to(&current, node);
    }

    let _guard = ContextGuard::enter(Rc::clone(node));
    f()
}
