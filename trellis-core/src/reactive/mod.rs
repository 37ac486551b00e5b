//! Reactive Primitives
//!
//! This module implements the derived side of the graph: references, the
//! reference cache behind [`sub`], and observers.
//!
//! # Concepts
//!
//! ## References
//!
//! A Reference is a derived value that caches its result while somebody is
//! subscribed to it. Reading a reference from inside another evaluation makes
//! the reader a dependent. When a dependency changes, the reference
//! re-derives, and only passes the change on if the value is actually
//! different.
//!
//! ## Subscriptions
//!
//! A Subscription is a factory of references keyed by arguments. Equal
//! arguments share one reference for as long as it has subscribers.
//!
//! ## Observers
//!
//! An Observer is the consumer at the edge of the graph. It reads references
//! and is notified, at most once per propagation, when any of them change.
//!
//! # Implementation Notes
//!
//! Dependencies are found by watching reads: whichever node is on top of the
//! context stack when a reference is read subscribes to it. Nothing here is
//! thread-safe; a graph lives on a single thread.

mod cache;
mod equality;
mod observer;
mod reference;

pub use cache::{sub, sub_named, sub_root, ArgsKey, ReferenceCache, Subscription};
pub use equality::{are_same, Cached};
pub use observer::Observer;
pub use reference::Reference;
