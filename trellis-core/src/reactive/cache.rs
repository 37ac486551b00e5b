//! Parameterized References
//!
//! [`sub`] turns a function of some arguments into a factory of references.
//! Asking for the same arguments twice gives back the same [`Reference`] for
//! as long as somebody is subscribed to it, so every consumer of
//! `ships.get(id)` shares one cached derivation.
//!
//! Arguments are keyed by their JSON serialization, which makes structurally
//! equal arguments share an entry. A reference leaves the cache on its own
//! once it loses its last subscriber.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::rc::Rc;

use serde::Serialize;
use tracing::{trace, warn};

use super::reference::Reference;
use crate::error::Result;
use crate::graph::NodeId;
use crate::store::Store;

/// Cache key derived from a serializable argument value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgsKey(String);

impl ArgsKey {
    /// Key for `args`. Structurally equal arguments produce equal keys.
    pub fn of<A: Serialize + ?Sized>(args: &A) -> Result<Self> {
        Ok(Self(serde_json::to_string(args)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// References keyed by their arguments.
pub struct ReferenceCache<V>
where
    V: Clone + PartialEq + 'static,
{
    entries: RefCell<HashMap<ArgsKey, Reference<V>>>,
}

impl<V> ReferenceCache<V>
where
    V: Clone + PartialEq + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &ArgsKey) -> Option<Reference<V>> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn put(&self, key: ArgsKey, reference: Reference<V>) {
        let replaced = self.entries.borrow_mut().insert(key, reference);
        drop(replaced);
    }

    /// Remove the entry for `key`, whatever it holds.
    pub fn delete(&self, key: &ArgsKey) -> bool {
        let removed = self.entries.borrow_mut().remove(key);
        removed.is_some()
    }

    /// Remove the entry for `key` only if it still holds the reference `owner`.
    ///
    /// An evicted reference can outlive its entry, and a later eviction of it
    /// must not take out whatever replaced it.
    pub fn evict(&self, key: &ArgsKey, owner: NodeId) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            match entries.get(key) {
                Some(reference) if reference.id() == owner => entries.remove(key),
                _ => None,
            }
        };
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<V> Default for ReferenceCache<V>
where
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A factory of cached references, created by [`sub`].
pub struct Subscription<A, V>
where
    V: Clone + PartialEq + 'static,
{
    derive: Rc<dyn Fn(&A) -> V>,
    cache: Rc<ReferenceCache<V>>,
    name: Option<Rc<str>>,
}

impl<A, V> Subscription<A, V>
where
    A: Serialize + 'static,
    V: Clone + PartialEq + 'static,
{
    /// The reference deriving the value for `args`.
    ///
    /// Returns the cached reference when one exists for structurally equal
    /// arguments. Arguments that cannot be serialized get a fresh reference
    /// that is never cached.
    ///
    /// Entries are evicted when their reference releases its value, which
    /// happens once it loses its last subscriber or is read with none. A
    /// reference fetched here but never read nor subscribed stays cached
    /// until one of those happens.
    pub fn get(&self, args: A) -> Reference<V> {
        let key = match ArgsKey::of(&args) {
            Ok(key) => key,
            Err(err) => {
                warn!(%err, subscription = self.name().unwrap_or("anonymous"), "arguments not cacheable");
                return self.build(args);
            }
        };

        if let Some(reference) = self.cache.get(&key) {
            trace!(key = key.as_str(), "reference cache hit");
            return reference;
        }

        trace!(key = key.as_str(), "reference cache miss");
        let reference = self.build(args);
        self.cache.put(key.clone(), reference.clone());

        let cache = Rc::downgrade(&self.cache);
        let owner = reference.id();
        reference.on_no_subscribers(move || {
            if let Some(cache) = cache.upgrade() {
                if cache.evict(&key, owner) {
                    trace!(key = key.as_str(), "reference evicted");
                }
            }
        });
        reference
    }

    fn build(&self, args: A) -> Reference<V> {
        let derive = Rc::clone(&self.derive);
        let reference = Reference::new(move || derive(&args));
        match &self.name {
            Some(name) => reference.named(format!("sub({name})")),
            None => reference,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of references currently cached.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

impl<A, V> Clone for Subscription<A, V>
where
    V: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            derive: Rc::clone(&self.derive),
            cache: Rc::clone(&self.cache),
            name: self.name.clone(),
        }
    }
}

impl<A, V> Debug for Subscription<A, V>
where
    V: Clone + PartialEq + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Create a factory of cached references from a derivation over arguments.
///
/// # Example
///
/// ```rust,ignore
/// let ship_by_id = sub(move |id: &String| ships.deref().get(id).cloned());
///
/// let serenity = ship_by_id.get("serenity".to_string());
/// ```
pub fn sub<A, V, F>(derive: F) -> Subscription<A, V>
where
    A: Serialize + 'static,
    V: Clone + PartialEq + 'static,
    F: Fn(&A) -> V + 'static,
{
    Subscription {
        derive: Rc::new(derive),
        cache: Rc::new(ReferenceCache::new()),
        name: None,
    }
}

/// Like [`sub`], with references labelled `Reference(sub(name))`.
pub fn sub_named<A, V, F>(name: &str, derive: F) -> Subscription<A, V>
where
    A: Serialize + 'static,
    V: Clone + PartialEq + 'static,
    F: Fn(&A) -> V + 'static,
{
    Subscription {
        name: Some(Rc::from(name)),
        ..sub(derive)
    }
}

/// A reference to the full state of the nearest `Store<V>` in scope.
///
/// The store is looked up on every read, so the same reference follows
/// whatever store the current evaluation runs under.
///
/// # Panics
///
/// Reading it outside of any store's scope panics, as does reading it where
/// only stores of other state types are bound.
pub fn sub_root<V>() -> Reference<V>
where
    V: Clone + PartialEq + 'static,
{
    Reference::volatile(|| match Store::<V>::in_scope() {
        Ok(store) => store.deref(),
        Err(err) => panic!("{err}"),
    })
    .named("@root")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn structurally_equal_arguments_share_a_reference() {
        let lengths = sub(|id: &String| id.len());

        let first = lengths.get("serenity".to_string());
        first.subscribe(|_| {});
        let second = lengths.get("serenity".to_string());

        assert!(Reference::ptr_eq(&first, &second));
        assert_eq!(lengths.cached_count(), 1);

        let other = lengths.get("firefly".to_string());
        assert!(!Reference::ptr_eq(&first, &other));
    }

    #[test]
    fn tuple_arguments_are_keyed_by_value() {
        let sums = sub(|(a, b): &(i32, i32)| a + b);

        let first = sums.get((1, 2));
        first.subscribe(|_| {});

        assert!(Reference::ptr_eq(&first, &sums.get((1, 2))));
        assert!(!Reference::ptr_eq(&first, &sums.get((2, 1))));
    }

    #[test]
    fn unqualified_deref_evicts() {
        let captain = sub(|_: &()| "mreynolds".to_string());

        let reference = captain.get(());
        assert!(Reference::ptr_eq(&captain.get(()), &reference));

        assert_eq!(reference.deref(), "mreynolds");

        // nobody was subscribed, so the read released it
        assert_eq!(captain.cached_count(), 0);
        assert!(!Reference::ptr_eq(&captain.get(()), &reference));
    }

    #[test]
    fn fetched_references_stay_cached_until_read() {
        let doubled = sub(|n: &i32| n * 2);

        let reference = doubled.get(4);
        drop(reference);
        assert_eq!(doubled.cached_count(), 1);

        assert_eq!(doubled.get(4).deref(), 8);
        assert_eq!(doubled.cached_count(), 0);
    }

    #[test]
    fn losing_the_last_subscriber_evicts() {
        let doubled = sub(|n: &i32| n * 2);

        let reference = doubled.get(21);
        let id = reference.subscribe(|_| {});
        assert_eq!(doubled.cached_count(), 1);

        reference.unsubscribe(id);
        assert_eq!(doubled.cached_count(), 0);
    }

    #[test]
    fn stale_eviction_leaves_the_replacement_alone() {
        let doubled = sub(|n: &i32| n * 2);

        let stale = doubled.get(1);
        stale.deref();

        let fresh = doubled.get(1);
        fresh.subscribe(|_| {});

        // the stale reference releases again; its old entry is gone already
        let id = stale.subscribe(|_| {});
        stale.unsubscribe(id);

        assert!(Reference::ptr_eq(&doubled.get(1), &fresh));
    }

    #[test]
    fn unserializable_arguments_are_not_cached() {
        let call_count = Rc::new(Cell::new(0));
        let call_count_clone = call_count.clone();

        let totals = sub(move |map: &HashMap<(i32, i32), i32>| {
            call_count_clone.set(call_count_clone.get() + 1);
            map.values().sum::<i32>()
        });

        let mut args = HashMap::new();
        args.insert((1, 1), 5);

        let first = totals.get(args.clone());
        first.subscribe(|_| {});
        let second = totals.get(args);

        assert!(!Reference::ptr_eq(&first, &second));
        assert_eq!(totals.cached_count(), 0);
        assert_eq!(second.deref(), 5);
    }

    #[test]
    fn named_subscriptions_label_their_references() {
        let ships = sub_named("ships", |_: &()| 3);
        assert_eq!(ships.get(()).name(), "Reference(sub(ships))");
    }

    #[test]
    fn delete_removes_unconditionally() {
        let cache = ReferenceCache::new();
        let key = ArgsKey::of(&"serenity").unwrap();
        cache.put(key.clone(), Reference::new(|| 1));

        assert!(!cache.evict(&key, NodeId::new()));
        assert_eq!(cache.len(), 1);

        assert!(cache.delete(&key));
        assert!(cache.is_empty());
    }
}
