//! Trellis Core
//!
//! This crate provides a dependency-tracking incremental computation graph
//! over a root state store. It implements:
//!
//! - Stores holding state, with queued and batched event dispatch
//! - References: cached derivations whose dependencies are discovered by
//!   watching what they read
//! - Parameterized reference factories with shared caching ([`sub`])
//! - Change propagation that notifies every consumer at most once per update
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the evaluation context stack, subscription bookkeeping and
//!   batched notification shared by all nodes
//! - `reactive`: references, the reference cache, and observers
//! - `store`: stores, their dispatch queue, schedulers, effects, and
//!   composition
//!
//! Graphs are single-threaded. Nodes are reference counted and release
//! themselves once nothing reads them any more.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{sub, Observer, Store};
//! use trellis_core::store::events::update;
//!
//! let store = Store::new(vec![3, 1, 2]);
//!
//! // a derivation over the store, cached per argument
//! let largest = sub({
//!     let store = store.clone();
//!     move |n: &usize| {
//!         let mut items = store.deref();
//!         items.sort_unstable_by(|a, b| b.cmp(a));
//!         items.into_iter().take(*n).collect::<Vec<_>>()
//!     }
//! });
//!
//! let view = Observer::new(|_| println!("top two changed"));
//! let top_two = largest.get(2);
//! view.track(|| top_two.deref());
//!
//! store.dispatch(update(|items: &Vec<i32>| [items.as_slice(), &[9]].concat()));
//! // prints: "top two changed"
//! ```

pub mod graph;
pub mod reactive;
pub mod store;

mod error;

pub use error::{Error, Result};
pub use graph::{ContextStack, NodeId, SubscriberId};
pub use reactive::{sub, sub_named, sub_root, Observer, Reference, Subscription};
pub use store::{
    compose_stores, ComposedStore, ManualScheduler, QueuePhase, StateStore, Store, StoreEvent,
    StoreOptions, TokioScheduler,
};
