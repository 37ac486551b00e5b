//! Cached values and change detection.

/// The cached value of a reference.
#[derive(Debug, Clone)]
pub enum Cached<T> {
    /// Nothing cached: never computed, or invalidated because nobody is
    /// subscribed.
    Valueless,

    /// A value computed by the last evaluation.
    Value(T),
}

impl<T> Cached<T> {
    pub fn is_valueless(&self) -> bool {
        matches!(self, Cached::Valueless)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Cached::Valueless => None,
            Cached::Value(value) => Some(value),
        }
    }

    /// Take the value out, leaving `Valueless` behind.
    pub fn take(&mut self) -> Cached<T> {
        std::mem::take(self)
    }
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Cached::Valueless
    }
}

/// Whether two cached values are the same for change-detection purposes.
///
/// Values compare structurally through `PartialEq`; `Valueless` is equal only
/// to itself, so the first computed value always counts as a change.
pub fn are_same<T: PartialEq>(a: &Cached<T>, b: &Cached<T>) -> bool {
    match (a, b) {
        (Cached::Valueless, Cached::Valueless) => true,
        (Cached::Value(a), Cached::Value(b)) => a == b,
        _ => false,
    }
}
