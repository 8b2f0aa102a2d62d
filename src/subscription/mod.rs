//! Subscriptions and the registry binding them to namespace nodes.

mod filter;
mod registry;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pattern::Pattern;
use crate::tree::NodeId;

pub use filter::{EventFilter, Filter};
pub use registry::{Binding, SubscriptionRegistry};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a consumer asks for when subscribing.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    /// Address events are delivered to.
    pub listener: String,
    /// Event name pattern, e.g. `Device.T.*.P` or `Device.T.`.
    pub event_name: String,
    pub filter: Option<Filter>,
    /// Polling interval hint for auto-published properties.
    pub interval: Option<Duration>,
    /// Lifetime after which the subscription lapses.
    pub duration: Option<Duration>,
}

impl SubscriptionRequest {
    #[must_use]
    pub fn new(listener: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            event_name: event_name.into(),
            filter: None,
            interval: None,
            duration: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// An active subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) listener: String,
    pub(crate) pattern: Pattern,
    pub(crate) filter: Option<Filter>,
    pub(crate) auto_publish: bool,
    pub(crate) interval: Option<Duration>,
    pub(crate) duration: Option<Duration>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) registration: NodeId,
    pub(crate) instances: Vec<NodeId>,
}

#[allow(missing_docs)]
impl Subscription {
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// The event name exactly as subscribed.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.pattern.source()
    }

    #[must_use]
    pub const fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[must_use]
    pub const fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub const fn auto_publish(&self) -> bool {
        self.auto_publish
    }

    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        self.duration
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Registration element the pattern was parsed against.
    #[must_use]
    pub const fn registration(&self) -> NodeId {
        self.registration
    }

    /// Nodes currently bound to this subscription.
    #[must_use]
    pub fn instances(&self) -> &[NodeId] {
        &self.instances
    }

    /// When the subscription lapses, if it was given a duration.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let d = chrono::Duration::from_std(self.duration?).ok()?;
        self.created_at.checked_add_signed(d)
    }
}
