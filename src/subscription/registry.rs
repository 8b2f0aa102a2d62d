//! Subscription registry.
//!
//! Subscriptions are keyed by (listener, event name, filter identity). Each
//! keeps the set of nodes it is bound to, and each bound node keeps the
//! subscription id in its back-reference list, so dispatch never has to
//! re-evaluate patterns.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{BusError, BusResult};
use crate::pattern::Pattern;
use crate::tree::{NamespaceTree, NodeId, ReleasedNode};

use super::{Filter, Subscription, SubscriptionId, SubscriptionRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    listener: String,
    event_name: String,
    filter: Option<Filter>,
}

impl SubscriptionKey {
    fn new(listener: &str, event_name: &str, filter: Option<&Filter>) -> Self {
        Self {
            listener: listener.to_string(),
            event_name: event_name.to_string(),
            filter: filter.cloned(),
        }
    }
}

/// A (subscription, node) pair that was bound or unbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub subscription: SubscriptionId,
    pub node: NodeId,
}

/// Active subscriptions of one bus handle.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_key: HashMap<SubscriptionKey, SubscriptionId>,
    // Registration order; bindings and deliveries follow it.
    order: Vec<SubscriptionId>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.by_id.get(&id)
    }

    /// Subscriptions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Creates a subscription and binds it to every currently matching node.
    ///
    /// Finding no match is not an error: rows the pattern selects may simply not
    /// exist yet.
    pub fn add(
        &mut self,
        tree: &mut NamespaceTree,
        request: &SubscriptionRequest,
        auto_publish: bool,
        registration: NodeId,
    ) -> BusResult<SubscriptionId> {
        let key = SubscriptionKey::new(&request.listener, &request.event_name, request.filter.as_ref());
        if self.by_key.contains_key(&key) {
            return Err(BusError::AlreadySubscribed {
                listener: request.listener.clone(),
                event_name: request.event_name.clone(),
            });
        }

        let pattern = Pattern::for_element(&request.event_name, tree, registration)?;
        let id = SubscriptionId::new();

        let instances = pattern.find_matches(tree);
        for &node in &instances {
            tree.attach_subscription(node, id);
        }

        debug!(
            subscription = %id,
            listener = %request.listener,
            event = %request.event_name,
            matched = instances.len(),
            "subscription added"
        );

        self.by_id.insert(
            id,
            Subscription {
                id,
                listener: request.listener.clone(),
                pattern,
                filter: request.filter.clone(),
                auto_publish,
                interval: request.interval,
                duration: request.duration,
                created_at: Utc::now(),
                registration,
                instances,
            },
        );
        self.by_key.insert(key, id);
        self.order.push(id);
        Ok(id)
    }

    /// Drops a subscription after stripping its back-reference from every
    /// bound node.
    pub fn remove(&mut self, tree: &mut NamespaceTree, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.by_id.remove(&id)?;
        for &node in &sub.instances {
            tree.detach_subscription(node, id);
        }
        self.by_key
            .remove(&SubscriptionKey::new(&sub.listener, sub.event_name(), sub.filter.as_ref()));
        self.order.retain(|&s| s != id);
        debug!(subscription = %id, event = %sub.event_name(), "subscription removed");
        Some(sub)
    }

    /// Exact key lookup.
    #[must_use]
    pub fn lookup(&self, listener: &str, event_name: &str, filter: Option<&Filter>) -> Option<SubscriptionId> {
        self.by_key
            .get(&SubscriptionKey::new(listener, event_name, filter))
            .copied()
    }

    /// Binds existing subscriptions to a freshly instantiated row.
    ///
    /// The row itself is tested, then its subtree: container children are
    /// tested and recursed into, other children are tested only. A nested table
    /// created with the row has no rows yet, so nothing below it can match.
    pub fn on_row_added(&mut self, tree: &mut NamespaceTree, row: NodeId) -> Vec<Binding> {
        let mut candidates = vec![row];
        collect_row_candidates(tree, row, &mut candidates);
        self.bind_nodes(tree, &candidates)
    }

    /// Unbinds every subscription from a row about to be deleted.
    pub fn on_row_removed(&mut self, tree: &mut NamespaceTree, row: NodeId) -> Vec<Binding> {
        let mut unbound = Vec::new();
        for node in tree.subtree(row) {
            for sid in tree.take_subscriptions(node) {
                if let Some(sub) = self.by_id.get_mut(&sid) {
                    sub.instances.retain(|&n| n != node);
                }
                unbound.push(Binding {
                    subscription: sid,
                    node,
                });
            }
        }
        unbound
    }

    /// Tests `nodes` against every subscription and binds the matches.
    pub fn bind_nodes(&mut self, tree: &mut NamespaceTree, nodes: &[NodeId]) -> Vec<Binding> {
        let mut bound = Vec::new();
        for &node in nodes {
            for sid in &self.order {
                let Some(sub) = self.by_id.get_mut(sid) else {
                    continue;
                };
                if sub.instances.contains(&node) || !sub.pattern.binds(tree, node) {
                    continue;
                }
                sub.instances.push(node);
                tree.attach_subscription(node, *sid);
                bound.push(Binding {
                    subscription: *sid,
                    node,
                });
            }
        }
        bound
    }

    /// Forgets nodes the tree has freed.
    pub fn release(&mut self, released: &[ReleasedNode]) {
        for r in released {
            for sid in &r.subscriptions {
                if let Some(sub) = self.by_id.get_mut(sid) {
                    sub.instances.retain(|&n| n != r.id);
                }
            }
        }
    }

    /// Number of auto-publish subscriptions bound to `node`.
    #[must_use]
    pub fn auto_publish_count(&self, tree: &NamespaceTree, node: NodeId) -> usize {
        tree.get(node).map_or(0, |n| {
            n.subscriptions()
                .iter()
                .filter(|&sid| self.by_id.get(sid).is_some_and(|s| s.auto_publish))
                .count()
        })
    }

    /// Subscriptions whose duration has elapsed at `now`.
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<SubscriptionId> {
        self.iter()
            .filter(|s| s.expires_at().is_some_and(|e| e <= now))
            .map(Subscription::id)
            .collect()
    }

    /// True if any subscription carries a duration.
    #[must_use]
    pub fn has_expiring(&self) -> bool {
        self.by_id.values().any(|s| s.duration.is_some())
    }
}

fn collect_row_candidates(tree: &NamespaceTree, parent: NodeId, out: &mut Vec<NodeId>) {
    let Some(node) = tree.get(parent) else {
        return;
    };
    for &child in node.children() {
        let Some(c) = tree.get(child) else {
            continue;
        };
        if c.is_row_template() {
            continue;
        }
        out.push(child);
        if c.kind().is_container() {
            collect_row_candidates(tree, child, out);
        }
    }
}
