//! The bus handle.
//!
//! One [`Bus`] owns a namespace tree and a subscription registry behind a
//! single mutex. Every structural change and every match traversal runs under
//! that lock. Provider get/set/method callbacks and transport sends run after
//! it is released; row add/remove callbacks run while it is held, so the row
//! flow is atomic.

mod names;
pub mod registry;
mod rows;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::dispatch::{self, Delivery, EventPayload, EventTransport};
use crate::element::{ElementKind, ElementSpec, HandlerRef, SubscribeAction};
use crate::error::{BusError, BusResult};
use crate::monitor::{MonitorSignal, MonitorTarget, PollingMonitor, ValueChangeBridge};
use crate::pattern::Pattern;
use crate::subscription::{Filter, Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionRequest};
use crate::tree::{Insertion, NamespaceTree, NodeId};
use crate::value::Value;

use names::{registered_node, NameValidator};

pub use registry::BusRegistry;

/// Tree and registry, guarded together.
#[derive(Debug, Default)]
pub(crate) struct BusState {
    pub(crate) tree: NamespaceTree,
    pub(crate) subscriptions: SubscriptionRegistry,
}

impl BusState {
    /// Monitoring request for `node` if it is a property with a handler.
    fn monitor_target(&self, node: NodeId) -> Option<MonitorTarget> {
        let n = self.tree.get(node)?;
        if n.kind() != ElementKind::Property {
            return None;
        }
        let handler = Arc::clone(n.handler()?);
        let interval = n
            .subscriptions()
            .iter()
            .filter_map(|&sid| self.subscriptions.get(sid))
            .filter(|s| s.auto_publish())
            .filter_map(Subscription::interval)
            .min();
        Some(MonitorTarget {
            node,
            name: n.full_name().to_string(),
            handler,
            interval,
        })
    }

    fn is_monitored(&self, node: NodeId) -> bool {
        self.tree
            .get(node)
            .is_some_and(|n| n.kind() == ElementKind::Property)
            && self.subscriptions.auto_publish_count(&self.tree, node) > 0
    }

    /// Starts monitoring every node in `nodes` that now has auto-publish
    /// subscribers. Callers pass nodes that had none before.
    fn start_monitoring(&self, bridge: &dyn ValueChangeBridge, nodes: impl IntoIterator<Item = NodeId>) {
        let mut seen = HashSet::new();
        for node in nodes {
            if !seen.insert(node) || !self.is_monitored(node) {
                continue;
            }
            if let Some(target) = self.monitor_target(node) {
                debug!(element = %target.name, "start monitoring");
                bridge.start_monitoring(target);
            }
        }
    }

    /// Stops monitoring every monitored node in `nodes`.
    fn stop_monitoring(&self, bridge: &dyn ValueChangeBridge, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            if self.is_monitored(node) {
                debug!(element = self.tree.full_name(node).unwrap_or_default(), "stop monitoring");
                bridge.stop_monitoring(node);
            }
        }
    }
}

/// Handle to one component's bus.
pub struct Bus {
    component: String,
    config: BusConfig,
    validator: NameValidator,
    state: Mutex<BusState>,
    transport: Arc<dyn EventTransport>,
    bridge: Arc<dyn ValueChangeBridge>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("component", &self.component)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Opens a bus that polls auto-published properties with a
    /// [`PollingMonitor`].
    pub fn open(
        component: impl Into<String>,
        config: BusConfig,
        transport: Arc<dyn EventTransport>,
    ) -> BusResult<Arc<Self>> {
        config.validate()?;
        let slot: Arc<OnceLock<Weak<Self>>> = Arc::new(OnceLock::new());
        let sink_slot = Arc::clone(&slot);
        let monitor = PollingMonitor::spawn(&config, move |signal| match sink_slot.get() {
            None => true,
            Some(weak) => match weak.upgrade() {
                Some(bus) => {
                    bus.handle_signal(signal);
                    true
                }
                None => false,
            },
        })?;

        let bus = Self::with_bridge(component, config, transport, Arc::new(monitor))?;
        let _ = slot.set(Arc::downgrade(&bus));
        Ok(bus)
    }

    /// Opens a bus around a caller-supplied bridge. The bridge reports changes
    /// through [`Bus::handle_signal`].
    ///
    /// Bridge calls are made with the state lock held and must not block.
    pub fn with_bridge(
        component: impl Into<String>,
        config: BusConfig,
        transport: Arc<dyn EventTransport>,
        bridge: Arc<dyn ValueChangeBridge>,
    ) -> BusResult<Arc<Self>> {
        config.validate()?;
        let component = component.into();
        let validator = NameValidator::new(&config)?;
        info!(component = %component, "bus opened");
        Ok(Arc::new(Self {
            component,
            config,
            validator,
            state: Mutex::new(BusState::default()),
            transport,
            bridge,
        }))
    }

    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    fn state(&self) -> BusResult<MutexGuard<'_, BusState>> {
        self.state.lock().map_err(|_| {
            warn!(component = %self.component, "bus state lock poisoned");
            BusError::internal("bus state lock poisoned")
        })
    }

    fn send(&self, deliveries: &[Delivery], payload: &EventPayload) -> usize {
        dispatch::deliver(self.transport.as_ref(), deliveries, payload)
    }

    /// Runs `f` against a consistent view of the tree and registry.
    pub fn inspect<R>(&self, f: impl FnOnce(&NamespaceTree, &SubscriptionRegistry) -> R) -> BusResult<R> {
        let state = self.state()?;
        Ok(f(&state.tree, &state.subscriptions))
    }

    /// Registers a batch of elements owned by this component.
    ///
    /// The batch is all-or-nothing: if any element fails validation, every
    /// insert before it is undone, including containers it turned into
    /// tables. Branches registered under a row template are copied into
    /// existing rows and bound to matching subscriptions.
    pub fn register_elements(&self, specs: &[ElementSpec]) -> BusResult<()> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        let mut journal: Vec<Insertion> = Vec::new();
        for spec in specs {
            let result = self.validator.check(&state.tree, spec).and_then(|()| {
                state.tree.insert(
                    &spec.name,
                    spec.kind,
                    Some(Arc::clone(&spec.handler)),
                    Some(self.component.as_str()),
                )
            });
            match result {
                Ok(ins) => journal.push(ins),
                Err(err) => {
                    for ins in journal.iter().rev() {
                        let released = state.tree.undo(ins);
                        state.subscriptions.release(&released);
                    }
                    warn!(component = %self.component, element = %spec.name, error = %err, "registration rolled back");
                    return Err(err);
                }
            }
        }

        let created: Vec<NodeId> = journal.iter().flat_map(|ins| ins.created.iter().copied()).collect();
        let bound = state.subscriptions.bind_nodes(&mut state.tree, &created);
        state.start_monitoring(self.bridge.as_ref(), bound.iter().map(|b| b.node));
        info!(
            component = %self.component,
            elements = specs.len(),
            nodes = created.len(),
            bindings = bound.len(),
            "elements registered"
        );
        Ok(())
    }

    /// Unregisters elements by registration name. All names are checked before
    /// anything is removed.
    pub fn unregister_elements(&self, names: &[&str]) -> BusResult<()> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        let mut nodes = Vec::with_capacity(names.len());
        for &name in names {
            let node = registered_node(&state.tree, name).ok_or_else(|| BusError::not_found(name))?;
            nodes.push(node);
        }

        let mut freed = 0;
        for node in nodes {
            if !state.tree.contains(node) {
                continue;
            }
            // Released nodes keep their bindings until `release`, which is
            // what the monitor decision reads.
            let released = state.tree.remove(node);
            for r in &released {
                if r.kind == ElementKind::Property && has_auto_publish(&state.subscriptions, &r.subscriptions) {
                    self.bridge.stop_monitoring(r.id);
                }
            }
            state.subscriptions.release(&released);
            freed += released.len();
        }
        info!(component = %self.component, elements = names.len(), nodes = freed, "elements unregistered");
        Ok(())
    }

    /// Subscribes `request.listener` to `request.event_name`.
    ///
    /// The element's provider decides whether the bus auto-publishes value
    /// changes. Properties gaining their first auto-publish subscriber start
    /// being monitored.
    pub fn subscribe(&self, request: SubscriptionRequest) -> BusResult<SubscriptionId> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        if state
            .subscriptions
            .lookup(&request.listener, &request.event_name, request.filter.as_ref())
            .is_some()
        {
            return Err(BusError::AlreadySubscribed {
                listener: request.listener,
                event_name: request.event_name,
            });
        }

        let registration = state
            .tree
            .retrieve_schema(&request.event_name)
            .ok_or_else(|| BusError::not_found(&request.event_name))?;
        let (kind, handler) = {
            let node = state
                .tree
                .get(registration)
                .ok_or_else(|| BusError::not_found(&request.event_name))?;
            (node.kind(), node.handler().cloned())
        };
        let subtree = request.event_name.ends_with('.');
        if !subtree && !matches!(kind, ElementKind::Property | ElementKind::Event | ElementKind::Table) {
            return Err(BusError::WrongKind {
                element: request.event_name,
                expected: "property, event or table".to_string(),
                actual: kind.to_string(),
            });
        }
        // Validate before involving the provider.
        Pattern::for_element(&request.event_name, &state.tree, registration)?;

        let auto_publish = match &handler {
            Some(h) => h
                .event_subscribe(
                    SubscribeAction::Subscribe,
                    &request.event_name,
                    request.filter.as_ref(),
                    request.interval,
                )
                .map_err(|e| BusError::from_provider(e, "event_subscribe", &request.event_name))?,
            None => false,
        };

        let id = state
            .subscriptions
            .add(&mut state.tree, &request, auto_publish, registration)?;

        if auto_publish {
            let newly: Vec<NodeId> = state
                .subscriptions
                .get(id)
                .map(|s| s.instances().to_vec())
                .unwrap_or_default()
                .into_iter()
                .filter(|&n| state.subscriptions.auto_publish_count(&state.tree, n) == 1)
                .collect();
            state.start_monitoring(self.bridge.as_ref(), newly);
        }

        debug!(
            component = %self.component,
            subscription = %id,
            listener = %request.listener,
            event = %request.event_name,
            auto_publish,
            "subscribed"
        );
        Ok(id)
    }

    /// Removes the subscription keyed by (listener, event name, filter).
    pub fn unsubscribe(&self, listener: &str, event_name: &str, filter: Option<&Filter>) -> BusResult<()> {
        let mut guard = self.state()?;
        let id = guard
            .subscriptions
            .lookup(listener, event_name, filter)
            .ok_or_else(|| BusError::NotSubscribed {
                listener: listener.to_string(),
                event_name: event_name.to_string(),
            })?;
        let notify = self.drop_subscription(&mut guard, id);
        drop(guard);

        if let Some(handler) = notify {
            if let Err(err) = handler.event_subscribe(SubscribeAction::Unsubscribe, event_name, filter, None) {
                warn!(event = %event_name, error = %err, "provider unsubscribe notification failed");
            }
        }
        debug!(component = %self.component, listener, event = %event_name, "unsubscribed");
        Ok(())
    }

    /// Removes a subscription, stopping monitors whose last auto-publish
    /// subscriber it was. Returns the registration handler to notify.
    fn drop_subscription(&self, state: &mut BusState, id: SubscriptionId) -> Option<HandlerRef> {
        let sub = state.subscriptions.get(id)?;
        let handler = state.tree.get(sub.registration()).and_then(|n| n.handler().cloned());
        if sub.auto_publish() {
            let last: Vec<NodeId> = sub
                .instances()
                .iter()
                .copied()
                .filter(|&n| state.subscriptions.auto_publish_count(&state.tree, n) == 1)
                .collect();
            state.stop_monitoring(self.bridge.as_ref(), last);
        }
        state.subscriptions.remove(&mut state.tree, id);
        handler
    }

    /// Drops every subscription whose duration has elapsed. Returns how many
    /// were removed.
    pub fn purge_expired(&self) -> BusResult<usize> {
        let mut guard = self.state()?;
        if !guard.subscriptions.has_expiring() {
            return Ok(0);
        }
        let expired = guard.subscriptions.expired(Utc::now());
        let mut notify = Vec::new();
        for id in &expired {
            let name = guard.subscriptions.get(*id).map(|s| s.event_name().to_string());
            if let (Some(handler), Some(name)) = (self.drop_subscription(&mut guard, *id), name) {
                notify.push((handler, name));
            }
        }
        drop(guard);

        for (handler, name) in notify {
            if let Err(err) = handler.event_subscribe(SubscribeAction::Unsubscribe, &name, None, None) {
                warn!(event = %name, error = %err, "provider unsubscribe notification failed");
            }
        }
        if !expired.is_empty() {
            debug!(component = %self.component, count = expired.len(), "expired subscriptions purged");
        }
        Ok(expired.len())
    }

    /// Entry point for value-change bridges.
    pub fn handle_signal(&self, signal: MonitorSignal) {
        match signal {
            MonitorSignal::ValueChanged(change) => {
                let deliveries = match self.state() {
                    Ok(state) => {
                        if state.tree.full_name(change.node) != Some(change.name.as_str()) {
                            return;
                        }
                        dispatch::deliveries(&state.tree, &state.subscriptions, change.node)
                    }
                    Err(_) => return,
                };
                let payload = EventPayload::ValueChanged {
                    element: change.name,
                    value: change.value,
                };
                self.send(&deliveries, &payload);
            }
            MonitorSignal::Tick => {
                if let Err(err) = self.purge_expired() {
                    warn!(error = %err, "expiry purge failed");
                }
            }
        }
    }

    /// Resolves an instance path and returns its handler and concrete name
    /// after checking the kind.
    fn resolve(&self, name: &str, expected: ElementKind, operation: &str) -> BusResult<(HandlerRef, String)> {
        let state = self.state()?;
        let node = state
            .tree
            .retrieve_instance(name)
            .and_then(|id| state.tree.get(id))
            .ok_or_else(|| BusError::not_found(name))?;
        if node.kind() != expected {
            return Err(BusError::WrongKind {
                element: name.to_string(),
                expected: expected.to_string(),
                actual: node.kind().to_string(),
            });
        }
        let handler = node.handler().cloned().ok_or_else(|| BusError::Unsupported {
            operation: operation.to_string(),
            element: name.to_string(),
        })?;
        Ok((handler, node.full_name().to_string()))
    }

    /// Reads a property. Row segments may be instance numbers or `[alias]`.
    pub fn get(&self, name: &str) -> BusResult<Value> {
        let (handler, full_name) = self.resolve(name, ElementKind::Property, "get")?;
        handler
            .get(&full_name)
            .map_err(|e| BusError::from_provider(e, "get", &full_name))
    }

    /// Writes a property and commits it.
    pub fn set(&self, name: &str, value: &Value) -> BusResult<()> {
        self.set_in_session(name, value, 0, true)
    }

    /// Writes a property as part of a provider session.
    pub fn set_in_session(&self, name: &str, value: &Value, session: u32, commit: bool) -> BusResult<()> {
        let (handler, full_name) = self.resolve(name, ElementKind::Property, "set")?;
        handler
            .set(&full_name, value, session, commit)
            .map_err(|e| BusError::from_provider(e, "set", &full_name))
    }

    /// Invokes a method element.
    pub fn invoke_method(&self, name: &str, input: &Value) -> BusResult<Value> {
        let (handler, full_name) = self.resolve(name, ElementKind::Method, "invoke_method")?;
        handler
            .invoke_method(&full_name, input)
            .map_err(|e| BusError::from_provider(e, "invoke_method", &full_name))
    }

    /// Publishes a provider-fired event to the element's subscribers. Returns
    /// the number of successful sends.
    pub fn publish_event(&self, name: &str, data: Value) -> BusResult<usize> {
        let (deliveries, full_name) = {
            let state = self.state()?;
            let node = state
                .tree
                .retrieve_instance(name)
                .ok_or_else(|| BusError::not_found(name))?;
            let kind = state.tree.get(node).map_or(ElementKind::Container, |n| n.kind());
            if kind != ElementKind::Event {
                return Err(BusError::WrongKind {
                    element: name.to_string(),
                    expected: ElementKind::Event.to_string(),
                    actual: kind.to_string(),
                });
            }
            (
                dispatch::deliveries(&state.tree, &state.subscriptions, node),
                state.tree.full_name(node).unwrap_or(name).to_string(),
            )
        };
        let payload = EventPayload::General {
            element: full_name,
            data,
        };
        Ok(self.send(&deliveries, &payload))
    }

    /// Concrete instance names a wildcard, alias or partial-path pattern
    /// currently selects.
    pub fn resolve_names(&self, pattern: &str) -> BusResult<Vec<String>> {
        let state = self.state()?;
        let registration = state
            .tree
            .retrieve_schema(pattern)
            .ok_or_else(|| BusError::not_found(pattern))?;
        let parsed = Pattern::for_element(pattern, &state.tree, registration)?;
        Ok(parsed
            .find_matches(&state.tree)
            .into_iter()
            .filter_map(|n| state.tree.full_name(n).map(str::to_string))
            .collect())
    }

    /// Values of every property the pattern selects, in tree order.
    pub fn get_matching(&self, pattern: &str) -> BusResult<Vec<(String, Value)>> {
        let targets: Vec<(HandlerRef, String)> = {
            let state = self.state()?;
            let registration = state
                .tree
                .retrieve_schema(pattern)
                .ok_or_else(|| BusError::not_found(pattern))?;
            let parsed = Pattern::for_element(pattern, &state.tree, registration)?;
            parsed
                .find_matches(&state.tree)
                .into_iter()
                .filter_map(|n| state.tree.get(n))
                .filter(|n| n.kind() == ElementKind::Property)
                .filter_map(|n| n.handler().map(|h| (Arc::clone(h), n.full_name().to_string())))
                .collect()
        };
        targets
            .into_iter()
            .map(|(handler, name)| {
                let value = handler
                    .get(&name)
                    .map_err(|e| BusError::from_provider(e, "get", &name))?;
                Ok((name, value))
            })
            .collect()
    }

    /// Adds a row to the table at `table_path` and returns its instance
    /// number.
    pub fn add_row(&self, table_path: &str, alias: Option<&str>) -> BusResult<u32> {
        let (number, outcome) = {
            let mut state = self.state()?;
            rows::add_row(&mut state, self.bridge.as_ref(), table_path, alias)?
        };
        self.send(&outcome.deliveries, &outcome.payload);
        Ok(number)
    }

    /// Removes the row at `row_path`.
    pub fn remove_row(&self, row_path: &str) -> BusResult<()> {
        let outcome = {
            let mut state = self.state()?;
            rows::remove_row(&mut state, self.bridge.as_ref(), row_path)?
        };
        self.send(&outcome.deliveries, &outcome.payload);
        Ok(())
    }

    /// Full names of the nodes a subscription is bound to.
    pub fn subscription_instances(&self, id: SubscriptionId) -> BusResult<Vec<String>> {
        let state = self.state()?;
        let sub = state
            .subscriptions
            .get(id)
            .ok_or_else(|| BusError::not_found(format!("subscription {id}")))?;
        Ok(sub
            .instances()
            .iter()
            .filter_map(|&n| state.tree.full_name(n).map(str::to_string))
            .collect())
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        info!(component = %self.component, "bus closed");
    }
}

fn has_auto_publish(registry: &SubscriptionRegistry, subs: &[SubscriptionId]) -> bool {
    subs.iter()
        .any(|&sid| registry.get(sid).is_some_and(Subscription::auto_publish))
}
