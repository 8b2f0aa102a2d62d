//! Value-change bridge.
//!
//! The bus tells the bridge when a property gains its first auto-publish
//! subscriber and when it loses its last one. The bundled [`PollingMonitor`]
//! polls monitored properties on a worker thread and reports changes back as
//! [`MonitorSignal`]s; it never touches the tree.

mod poller;

use std::fmt;
use std::time::Duration;

use crate::element::HandlerRef;
use crate::tree::NodeId;
use crate::value::Value;

pub use poller::PollingMonitor;

/// A property the bridge should watch.
#[derive(Clone)]
pub struct MonitorTarget {
    pub node: NodeId,
    /// Concrete instance name passed to the handler.
    pub name: String,
    pub handler: HandlerRef,
    /// Poll interval requested by the subscriber, if any.
    pub interval: Option<Duration>,
}

impl fmt::Debug for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorTarget")
            .field("node", &self.node)
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Start/stop contract between the bus and whatever detects value changes.
///
/// Both calls are idempotent.
pub trait ValueChangeBridge: Send + Sync {
    fn start_monitoring(&self, target: MonitorTarget);
    fn stop_monitoring(&self, node: NodeId);
}

/// A detected change.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub node: NodeId,
    pub name: String,
    pub value: Value,
}

/// What the poller reports back to the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorSignal {
    ValueChanged(ValueChange),
    /// Periodic wake-up, used for subscription expiry.
    Tick,
}
