//! Composed Stores
//!
//! A composed store presents several stores of the same state type as one
//! store whose state maps each member's key to the member's state. Reading
//! it reads every member; loading a snapshot into it loads each entry into
//! the member under that key.
//!
//! Members propagate on their own, one after the other, so a snapshot that
//! changes two members notifies subscribers of the composed store twice.

use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::options::StoreOptions;
use super::queue::{DispatchQueue, QueuePhase};
use super::{StateStore, Store, StoreEvent};
use crate::error::Result;
use crate::reactive::Reference;

/// State of a composed store: member key to member state.
pub type ComposedState<V> = IndexMap<String, V>;

struct ComposedInner<V>
where
    V: Clone + PartialEq + 'static,
{
    stores: IndexMap<String, Store<V>>,
    root: Reference<ComposedState<V>>,
    queue: Rc<DispatchQueue<ComposedState<V>>>,
}

impl<V> StateStore<ComposedState<V>> for ComposedInner<V>
where
    V: Clone + PartialEq + 'static,
{
    fn dispatch(&self, event: StoreEvent<ComposedState<V>>) {
        self.queue.enqueue(event);
    }

    fn dispatch_sync(&self, event: StoreEvent<ComposedState<V>>) -> Result<()> {
        self.queue.apply_now(self, event)
    }

    fn get_snapshot(&self) -> ComposedState<V> {
        self.stores
            .iter()
            .map(|(key, store)| (key.clone(), store.get_snapshot()))
            .collect()
    }

    fn load_snapshot(&self, mut snapshot: ComposedState<V>) {
        for (key, store) in &self.stores {
            if let Some(state) = snapshot.shift_remove(key) {
                store.load_snapshot(state);
            }
        }
        for key in snapshot.keys() {
            warn!(key = key.as_str(), "snapshot entry has no store; ignored");
        }
    }

    fn deref(&self) -> ComposedState<V> {
        self.root.deref()
    }
}

/// Several stores presented as one.
///
/// Created by [`compose_stores`].
pub struct ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    inner: Rc<ComposedInner<V>>,
}

impl<V> ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    /// Read every member through the composed root reference.
    pub fn deref(&self) -> ComposedState<V> {
        self.inner.root.deref()
    }

    /// The reference reading all members.
    pub fn root(&self) -> Reference<ComposedState<V>> {
        self.inner.root.clone()
    }

    pub fn get_snapshot(&self) -> ComposedState<V> {
        self.inner.get_snapshot()
    }

    /// Load each entry into the member store under its key.
    ///
    /// Members missing from `snapshot` keep their state.
    pub fn load_snapshot(&self, snapshot: ComposedState<V>) {
        self.inner.load_snapshot(snapshot);
    }

    pub fn dispatch<F>(&self, event: F)
    where
        F: FnOnce(&ComposedState<V>, &dyn StateStore<ComposedState<V>>) -> Option<ComposedState<V>>
            + 'static,
    {
        self.inner.queue.enqueue(Box::new(event));
    }

    pub fn dispatch_sync<F>(&self, event: F) -> Result<()>
    where
        F: FnOnce(&ComposedState<V>, &dyn StateStore<ComposedState<V>>) -> Option<ComposedState<V>>
            + 'static,
    {
        self.inner.queue.apply_now(&*self.inner, Box::new(event))
    }

    /// The member store under `key`.
    pub fn store(&self, key: &str) -> Option<&Store<V>> {
        self.inner.stores.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.stores.keys().map(String::as_str)
    }

    pub fn queue_phase(&self) -> QueuePhase {
        self.inner.queue.phase()
    }
}

impl<V> StateStore<ComposedState<V>> for ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    fn dispatch(&self, event: StoreEvent<ComposedState<V>>) {
        self.inner.dispatch(event);
    }

    fn dispatch_sync(&self, event: StoreEvent<ComposedState<V>>) -> Result<()> {
        self.inner.dispatch_sync(event)
    }

    fn get_snapshot(&self) -> ComposedState<V> {
        self.inner.get_snapshot()
    }

    fn load_snapshot(&self, snapshot: ComposedState<V>) {
        self.inner.load_snapshot(snapshot);
    }

    fn deref(&self) -> ComposedState<V> {
        self.inner.root.deref()
    }
}

impl<V> Clone for ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> Debug for ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedStore")
            .field("stores", &self.inner.stores.keys().collect::<Vec<_>>())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

/// Present `stores` as a single store keyed like the map.
///
/// Every member holds the same state type `V`. Stores of different types can
/// be composed by giving them a shared enum as their state.
pub fn compose_stores<V>(stores: IndexMap<String, Store<V>>) -> ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    compose_stores_with_options(stores, StoreOptions::default())
}

/// Like [`compose_stores`], with its own queue options.
pub fn compose_stores_with_options<V>(
    stores: IndexMap<String, Store<V>>,
    options: StoreOptions<ComposedState<V>>,
) -> ComposedStore<V>
where
    V: Clone + PartialEq + 'static,
{
    let members = stores.clone();
    let root = Reference::new(move || {
        members
            .iter()
            .map(|(key, store)| (key.clone(), store.deref()))
            .collect::<ComposedState<V>>()
    })
    .named("@composed");

    debug!(stores = stores.len(), "stores composed");

    let inner = Rc::new_cyclic(|weak: &Weak<ComposedInner<V>>| {
        let target: Weak<dyn StateStore<ComposedState<V>>> = weak.clone();
        ComposedInner {
            stores,
            root,
            queue: DispatchQueue::new(target, options),
        }
    });
    ComposedStore { inner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::update;
    use std::cell::RefCell;

    fn crew() -> ComposedStore<i32> {
        let mut stores = IndexMap::new();
        stores.insert("mal".to_string(), Store::new(1));
        stores.insert("zoe".to_string(), Store::new(2));
        compose_stores(stores)
    }

    #[test]
    fn composed_state_reads_every_member() {
        let composed = crew();

        let state = composed.deref();
        assert_eq!(state.get("mal"), Some(&1));
        assert_eq!(state.get("zoe"), Some(&2));
        assert_eq!(composed.keys().collect::<Vec<_>>(), vec!["mal", "zoe"]);
    }

    #[test]
    fn loading_writes_each_member() {
        let composed = crew();

        let mut snapshot = composed.get_snapshot();
        snapshot.insert("mal".to_string(), 10);
        snapshot.insert("wash".to_string(), 99);
        composed.load_snapshot(snapshot);

        assert_eq!(composed.store("mal").map(Store::get_snapshot), Some(10));
        assert_eq!(composed.store("zoe").map(Store::get_snapshot), Some(2));
        assert!(composed.store("wash").is_none());
    }

    #[test]
    fn member_changes_reach_composed_subscribers() {
        let composed = crew();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        composed
            .root()
            .subscribe(move |state| seen_clone.borrow_mut().push(state.get("zoe").copied()));

        if let Some(zoe) = composed.store("zoe") {
            zoe.dispatch(update(|n: &i32| n + 1));
        }

        assert_eq!(*seen.borrow(), vec![Some(3)]);
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Ledger {
        Cargo(Vec<String>),
        Credits(i64),
    }

    #[test]
    fn members_of_different_shapes_share_an_enum() {
        let mut stores = IndexMap::new();
        stores.insert("hold".to_string(), Store::new(Ledger::Cargo(vec!["mudders".to_string()])));
        stores.insert("purse".to_string(), Store::new(Ledger::Credits(40)));
        let composed = compose_stores(stores);

        if let Some(purse) = composed.store("purse") {
            purse.dispatch(update(|ledger: &Ledger| match ledger {
                Ledger::Credits(n) => Ledger::Credits(n + 2),
                other => other.clone(),
            }));
        }

        let state = composed.deref();
        assert_eq!(state.get("purse"), Some(&Ledger::Credits(42)));
        assert_eq!(state.get("hold"), Some(&Ledger::Cargo(vec!["mudders".to_string()])));
    }

    #[test]
    fn dispatch_updates_through_members() {
        let composed = crew();

        composed.dispatch(|state: &ComposedState<i32>, _: &dyn StateStore<ComposedState<i32>>| {
            Some(state.iter().map(|(k, v)| (k.clone(), v * 100)).collect())
        });

        assert_eq!(composed.store("mal").map(Store::get_snapshot), Some(100));
        assert_eq!(composed.store("zoe").map(Store::get_snapshot), Some(200));
    }
}
