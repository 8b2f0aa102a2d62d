//! Dispatch: who receives an event, and under which name.
//!
//! Ordinary events go to the subscriptions back-referenced on the node and
//! carry the subscription's own event name, so a wildcard subscriber sees
//! `Device.T.*.P` and tells rows apart by the payload. Row lifecycle events
//! are named after the table's partial path.

mod event;
mod transport;

use tracing::warn;

use crate::subscription::{Filter, SubscriptionId, SubscriptionRegistry};
use crate::tree::{NamespaceTree, NodeId};

pub use event::{BusEvent, EventKind, EventPayload};
pub use transport::{ChannelTransport, EventTransport, ListenerStream};

/// One resolved send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub listener: String,
    pub event_name: String,
    pub filter: Option<Filter>,
}

/// Listener addresses of every subscription bound on `node`, without
/// duplicates.
#[must_use]
pub fn publish_targets(tree: &NamespaceTree, registry: &SubscriptionRegistry, node: NodeId) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for d in deliveries(tree, registry, node) {
        if !out.contains(&d.listener) {
            out.push(d.listener);
        }
    }
    out
}

/// Per-subscription deliveries for an ordinary event on `node`.
#[must_use]
pub fn deliveries(tree: &NamespaceTree, registry: &SubscriptionRegistry, node: NodeId) -> Vec<Delivery> {
    let Some(n) = tree.get(node) else {
        return Vec::new();
    };
    n.subscriptions()
        .iter()
        .filter_map(|&sid| registry.get(sid))
        .map(|sub| Delivery {
            subscription: sub.id(),
            listener: sub.listener().to_string(),
            event_name: sub.event_name().to_string(),
            filter: sub.filter().cloned(),
        })
        .collect()
}

/// Deliveries for a row created in (or deleted from) `table`.
///
/// Targets are the table's own subscriptions, partial-path subscriptions bound
/// on its ancestors and, when `row` is given, subscriptions bound on the row.
#[must_use]
pub fn lifecycle_deliveries(
    tree: &NamespaceTree,
    registry: &SubscriptionRegistry,
    table: NodeId,
    row: Option<NodeId>,
) -> Vec<Delivery> {
    let Some(table_name) = tree.full_name(table) else {
        return Vec::new();
    };
    let event_name = format!("{table_name}.");

    let mut candidates: Vec<SubscriptionId> = Vec::new();
    let mut push = |sid: SubscriptionId| {
        if !candidates.contains(&sid) {
            candidates.push(sid);
        }
    };

    let chain = tree.chain(table);
    for &ancestor in chain.iter().take(chain.len().saturating_sub(1)) {
        let Some(node) = tree.get(ancestor) else {
            continue;
        };
        for &sid in node.subscriptions() {
            if registry.get(sid).is_some_and(|s| s.pattern().is_subtree()) {
                push(sid);
            }
        }
    }
    for id in std::iter::once(table).chain(row) {
        if let Some(node) = tree.get(id) {
            node.subscriptions().iter().copied().for_each(&mut push);
        }
    }

    candidates
        .into_iter()
        .filter_map(|sid| registry.get(sid))
        .map(|sub| Delivery {
            subscription: sub.id(),
            listener: sub.listener().to_string(),
            event_name: event_name.clone(),
            filter: None,
        })
        .collect()
}

/// Sends `payload` to every delivery and returns how many sends succeeded.
///
/// Value changes are offered to each subscription's filter first. Failed sends
/// are logged and skipped.
pub fn deliver(transport: &dyn EventTransport, deliveries: &[Delivery], payload: &EventPayload) -> usize {
    let mut sent = 0;
    for d in deliveries {
        if let (EventPayload::ValueChanged { value, .. }, Some(filter)) = (payload, &d.filter) {
            if !filter.apply(value) {
                continue;
            }
        }
        let event = BusEvent::new(d.event_name.clone(), payload.clone());
        match transport.send(&d.listener, &event) {
            Ok(()) => sent += 1,
            Err(err) => {
                warn!(listener = %d.listener, event = %d.event_name, error = %err, "event delivery failed");
            }
        }
    }
    sent
}
