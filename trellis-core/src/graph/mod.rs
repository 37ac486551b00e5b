//! Dependency Graph
//!
//! This module implements the bookkeeping shared by every node of the
//! computation graph: the evaluation context stack, per-node subscription
//! tracking, and batched change notification.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are stores, references (cached derived values), or plain
//!   consumers such as UI bindings
//! - Edges are subscriptions: if A read B during its last evaluation, A holds
//!   a subscription to B and B holds a change handler for A
//!
//! Edges are never declared. They are discovered by watching which sources a
//! node reads while it is on top of the [`ContextStack`], and pruned when a
//! later evaluation stops reading them.
//!
//! # Design Decisions
//!
//! 1. Edges live on the nodes themselves rather than in a central graph.
//!    A downstream node owns its subscription (and keeps the source alive);
//!    the source only keeps a weak handle to the downstream node.
//!
//! 2. Node kinds are an explicit tag ([`NodeKind`]); only nodes exposing a
//!    [`Source`] can be subscribed to.
//!
//! 3. Everything is single-threaded. The context stack is thread-local.

mod context;
mod node;
mod subscriber;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{with_context, ContextGuard, ContextStack};
pub use node::{
    dispatch_changes_batched, notify_changes_batched, subscribe_to, ChangeHandler,
    DependencyChanges, NodeCore, NodeId, NodeKind, Source, SubContext,
};
pub use subscriber::{Handler, SubscriberId, Subscribers};
