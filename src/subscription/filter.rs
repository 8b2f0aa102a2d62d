//! Value filters attached to subscriptions. Two filters are equal only when
//! they share one allocation.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::value::Value;

/// Opaque value predicate attached to a subscription.
///
/// The bus only calls [`EventFilter::apply`] before delivering a value-change;
/// the expression language behind it is up to the implementor.
pub trait EventFilter: Send + Sync {
    /// Returns true if `value` should be delivered.
    fn apply(&self, value: &Value) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn apply(&self, value: &Value) -> bool {
        self(value)
    }
}

/// Shared filter handle. Equality and hashing use the allocation identity, so
/// two separately created filters are distinct subscription keys even if they
/// behave the same.
#[derive(Clone)]
pub struct Filter(Arc<dyn EventFilter>);

impl Filter {
    /// Wraps a predicate.
    pub fn new(filter: impl EventFilter + 'static) -> Self {
        Self(Arc::new(filter))
    }

    /// Evaluates the predicate.
    #[must_use]
    pub fn apply(&self, value: &Value) -> bool {
        self.0.apply(value)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Filter {}

impl Hash for Filter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({:#x})", self.addr())
    }
}
