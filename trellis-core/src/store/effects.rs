//! Effects
//!
//! Events compute the next state. Anything else an update wants to happen,
//! such as dispatching follow-up events or talking to the outside world, is
//! an effect. An [`Effector`] collects effects while an update is worked out
//! and invokes them afterwards, in the order they were produced.
//!
//! ```rust,ignore
//! let log = effect(|line: String| println!("{line}"));
//!
//! let mut fx = Effector::new(store.get_snapshot());
//! fx.produce(log("docked".to_string()));
//! fx.dispatch_later(update(|n: &i32| n + 1), Duration::from_millis(50));
//! fx.invoke_queued(&store);
//! ```

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{StateStore, StoreEvent};

/// A queued effect.
pub enum Effect<V: 'static> {
    /// Runs without access to the store.
    Simple(Box<dyn FnOnce()>),

    /// Runs against the store the effects are invoked on.
    Stateful(Box<dyn FnOnce(&dyn StateStore<V>)>),

    /// Dispatch an event to the store.
    Dispatch(StoreEvent<V>),

    /// Dispatch an event to the store once the delay has passed.
    DispatchLater(StoreEvent<V>, Duration),
}

impl<V: 'static> Effect<V> {
    fn kind(&self) -> &'static str {
        match self {
            Effect::Simple(_) => "simple",
            Effect::Stateful(_) => "stateful",
            Effect::Dispatch(_) => "dispatch",
            Effect::DispatchLater(..) => "dispatch_later",
        }
    }
}

impl<V: 'static> Debug for Effect<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::DispatchLater(_, delay) => f.debug_tuple("DispatchLater").field(delay).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Turn a handler into a constructor of effects that run without the store.
pub fn effect<V, P, F>(handler: F) -> impl Fn(P) -> Effect<V>
where
    V: 'static,
    P: 'static,
    F: Fn(P) + 'static,
{
    let handler = Rc::new(handler);
    move |params| {
        let handler = Rc::clone(&handler);
        Effect::Simple(Box::new(move || (*handler)(params)))
    }
}

/// Turn a handler into a constructor of effects that run against the store.
pub fn state_effect<V, P, F>(handler: F) -> impl Fn(P) -> Effect<V>
where
    V: 'static,
    P: 'static,
    F: Fn(&dyn StateStore<V>, P) + 'static,
{
    let handler = Rc::new(handler);
    move |params| {
        let handler = Rc::clone(&handler);
        Effect::Stateful(Box::new(move |store: &dyn StateStore<V>| (*handler)(store, params)))
    }
}

/// Producing effects during an update.
pub trait Fx<V: 'static> {
    /// Queue `effect`.
    fn produce(&mut self, effect: Effect<V>);

    /// Replace the state the update is working on.
    fn store(&mut self, state: V);

    fn dispatch(&mut self, event: StoreEvent<V>) {
        self.produce(Effect::Dispatch(event));
    }

    fn dispatch_later(&mut self, event: StoreEvent<V>, delay: Duration) {
        self.produce(Effect::DispatchLater(event, delay));
    }
}

/// Collects effects until they are invoked.
pub struct Effector<V: 'static> {
    state: V,
    effects: Vec<Effect<V>>,
}

impl<V: 'static> Effector<V> {
    pub fn new(state: V) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> &V {
        &self.state
    }

    pub fn into_state(self) -> V {
        self.state
    }

    /// Number of effects waiting to be invoked.
    pub fn queued(&self) -> usize {
        self.effects.len()
    }

    /// Invoke every queued effect against `store`, oldest first.
    ///
    /// # Panics
    ///
    /// A queued [`Effect::DispatchLater`] spawns a timer onto the current
    /// tokio `LocalSet` and panics outside of one.
    pub fn invoke_queued<S>(&mut self, store: &S)
    where
        S: StateStore<V> + Clone + 'static,
    {
        let effects = std::mem::take(&mut self.effects);
        debug!(effects = effects.len(), "invoking queued effects");

        for effect in effects {
            trace!(effect = effect.kind(), "invoking effect");
            match effect {
                Effect::Simple(run) => run(),
                Effect::Stateful(run) => run(store),
                Effect::Dispatch(event) => store.dispatch(event),
                Effect::DispatchLater(event, delay) => {
                    let store = store.clone();
                    tokio::task::spawn_local(async move {
                        tokio::time::sleep(delay).await;
                        store.dispatch(event);
                    });
                }
            }
        }
    }

    /// Drop every queued effect without invoking it.
    pub fn reset(&mut self) {
        self.effects.clear();
    }
}

impl<V: 'static> Fx<V> for Effector<V> {
    fn produce(&mut self, effect: Effect<V>) {
        self.effects.push(effect);
    }

    fn store(&mut self, state: V) {
        self.state = state;
    }
}

impl<V: Debug + 'static> Debug for Effector<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effector")
            .field("state", &self.state)
            .field("effects", &self.effects)
            .finish()
    }
}

/// Hands out effectors and takes them back.
pub trait EffectorFactory<V: 'static> {
    fn acquire(&self, state: V) -> Effector<V>;
    fn release(&self, effector: Effector<V>);
}

/// Keeps the last released effector and hands it out again.
pub struct SingleEffectorFactory<V: 'static> {
    spare: RefCell<Option<Effector<V>>>,
}

impl<V: 'static> SingleEffectorFactory<V> {
    pub fn new() -> Self {
        Self {
            spare: RefCell::new(None),
        }
    }

    /// Whether a released effector is waiting to be reused.
    pub fn has_spare(&self) -> bool {
        self.spare.borrow().is_some()
    }
}

impl<V: 'static> Default for SingleEffectorFactory<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: 'static> EffectorFactory<V> for SingleEffectorFactory<V> {
    fn acquire(&self, state: V) -> Effector<V> {
        match self.spare.borrow_mut().take() {
            Some(mut effector) => {
                effector.state = state;
                effector
            }
            None => Effector::new(state),
        }
    }

    fn release(&self, mut effector: Effector<V>) {
        effector.reset();
        *self.spare.borrow_mut() = Some(effector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::update;
    use crate::store::Store;

    #[test]
    fn simple_and_state_effects_wait_for_invoke_queued() {
        let simple_invokes = Rc::new(RefCell::new(Vec::new()));
        let state_invokes = Rc::new(RefCell::new(Vec::new()));

        let simple = effect({
            let simple_invokes = simple_invokes.clone();
            move |id: &'static str| simple_invokes.borrow_mut().push(id)
        });
        let stateful = state_effect({
            let state_invokes = state_invokes.clone();
            move |store: &dyn StateStore<i32>, id: &'static str| {
                state_invokes.borrow_mut().push((id, store.get_snapshot()))
            }
        });

        let store = Store::new(7);
        let mut fx = Effector::new(store.get_snapshot());
        fx.produce(simple("simple"));
        fx.produce(stateful("state"));

        assert!(simple_invokes.borrow().is_empty());
        assert!(state_invokes.borrow().is_empty());
        assert_eq!(fx.queued(), 2);

        fx.invoke_queued(&store);

        assert_eq!(*simple_invokes.borrow(), vec!["simple"]);
        assert_eq!(*state_invokes.borrow(), vec![("state", 7)]);
        assert_eq!(fx.queued(), 0);
    }

    #[test]
    fn effects_run_in_production_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let note = effect({
            let log = log.clone();
            move |n: i32| log.borrow_mut().push(n)
        });

        let store = Store::new(0);
        let mut fx = Effector::new(0);
        for n in 1..=3 {
            fx.produce(note(n));
        }
        fx.invoke_queued(&store);

        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn dispatch_effect_reaches_the_store() {
        let store = Store::new(1);
        let mut fx = Effector::new(store.get_snapshot());

        fx.dispatch(update(|n: &i32| n + 1));
        assert_eq!(store.get_snapshot(), 1);

        fx.invoke_queued(&store);
        assert_eq!(store.get_snapshot(), 2);
    }

    #[test]
    fn store_replaces_the_working_state() {
        let mut fx: Effector<i32> = Effector::new(1);
        fx.store(5);
        assert_eq!(*fx.state(), 5);
        assert_eq!(fx.into_state(), 5);
    }

    #[test]
    fn reset_drops_queued_effects() {
        let ran = Rc::new(RefCell::new(false));
        let mark = effect({
            let ran = ran.clone();
            move |_: ()| *ran.borrow_mut() = true
        });

        let store = Store::new(0);
        let mut fx = Effector::new(0);
        fx.produce(mark(()));
        fx.reset();
        fx.invoke_queued(&store);

        assert!(!*ran.borrow());
    }

    #[test]
    fn factory_reuses_the_released_effector() {
        let factory = SingleEffectorFactory::new();

        let mut fx = factory.acquire(1);
        fx.dispatch(update(|n: &i32| n + 1));
        assert!(!factory.has_spare());

        factory.release(fx);
        assert!(factory.has_spare());

        let fx = factory.acquire(9);
        assert!(!factory.has_spare());
        assert_eq!(*fx.state(), 9);
        assert_eq!(fx.queued(), 0);
    }

    #[tokio::test]
    async fn dispatch_later_waits_for_the_delay() {
        let store = Store::new(1);
        let local = tokio::task::LocalSet::new();

        local
            .run_until({
                let store = store.clone();
                async move {
                    let mut fx = Effector::new(store.get_snapshot());
                    fx.dispatch_later(update(|n: &i32| n * 10), Duration::from_millis(10));
                    fx.invoke_queued(&store);

                    assert_eq!(store.get_snapshot(), 1);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;

        assert_eq!(store.get_snapshot(), 10);
    }
}
