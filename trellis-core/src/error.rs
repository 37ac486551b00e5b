//! Error types shared across the crate.
//!
//! Every failure in the graph is local and synchronous: errors are either
//! returned directly to the caller (`dispatch_sync`, `Store::in_scope`) or,
//! for invariant violations that cannot be recovered from, raised as a panic
//! carrying the same message.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced by the computation graph.
#[derive(Debug, Error)]
pub enum Error {
    /// `dispatch_sync` was called while the store was running queued events,
    /// i.e. from inside another event handler.
    #[error("dispatch_sync may not be called while the store is running queued events")]
    IllegalReentrantDispatch,

    /// A root dereference happened with no store bound to any active
    /// evaluation context.
    #[error("no store is bound to any active evaluation context; wrap the read in Store::with_context")]
    MissingStoreInScope,

    /// Stores are bound to the active contexts, but none of them holds the
    /// requested state type.
    #[error("no store in scope holds state of type `{expected}`")]
    StoreTypeMismatch {
        /// Type name of the requested state.
        expected: &'static str,
    },

    /// A context was popped that is not the top of the evaluation stack.
    #[error("evaluation context stack unbalanced: popping {expected:?} but {found:?} is on top")]
    UnbalancedContextStack {
        /// The node the caller tried to pop.
        expected: NodeId,
        /// The node actually on top, if any.
        found: Option<NodeId>,
    },

    /// The argument tuple of a subscription could not be turned into a
    /// cache key.
    #[error("could not serialize subscription arguments: {0}")]
    ArgumentKey(#[from] serde_json::Error),
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
