//! Event constructors.
//!
//! An event is a function from the current state to the next one, or to
//! `None` when it has nothing to change. These helpers cover the common
//! shapes so call sites don't have to spell out the full signature.
//!
//! ```rust,ignore
//! store.dispatch(update(|state: &State| State { count: state.count + 1, ..state.clone() }));
//!
//! let rename = update_with(|state: &State, name: String| State { name, ..state.clone() });
//! store.dispatch(rename("serenity".to_string()));
//! ```

use std::rc::Rc;

use super::{StateStore, StoreEvent};

/// Box an event closure.
///
/// Takes care of the closure's signature, which a bare `Box::new` would not
/// infer.
pub fn event<V, F>(f: F) -> StoreEvent<V>
where
    V: 'static,
    F: FnOnce(&V, &dyn StateStore<V>) -> Option<V> + 'static,
{
    Box::new(f)
}

/// An event that always replaces the state with `f(state)`.
pub fn update<V, F>(f: F) -> StoreEvent<V>
where
    V: 'static,
    F: FnOnce(&V) -> V + 'static,
{
    event(move |state, _| Some(f(state)))
}

/// Turn a parameterized update into a constructor of events.
pub fn update_with<V, P, F>(f: F) -> impl Fn(P) -> StoreEvent<V>
where
    V: 'static,
    P: 'static,
    F: Fn(&V, P) -> V + 'static,
{
    let f = Rc::new(f);
    move |params| {
        let f = Rc::clone(&f);
        event(move |state, _| Some((*f)(state, params)))
    }
}

/// An event that replaces the state with `value`.
pub fn replace<V: 'static>(value: V) -> StoreEvent<V> {
    event(move |_, _| Some(value))
}
