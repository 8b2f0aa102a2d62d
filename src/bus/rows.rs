//! Row lifecycle.
//!
//! Both flows run with the state lock held and either complete every step or
//! fail before the tree is touched. The provider callback comes first; the
//! lifecycle event is returned for sending once the lock is released.

use tracing::debug;

use crate::dispatch::{self, Delivery, EventPayload};
use crate::error::{BusError, BusResult};
use crate::monitor::ValueChangeBridge;
use crate::tree::path::parse_alias;

use super::BusState;

/// Lifecycle event to send after unlocking.
#[derive(Debug)]
pub(super) struct RowOutcome {
    pub deliveries: Vec<Delivery>,
    pub payload: EventPayload,
}

pub(super) fn add_row(
    state: &mut BusState,
    bridge: &dyn ValueChangeBridge,
    table_path: &str,
    alias: Option<&str>,
) -> BusResult<(u32, RowOutcome)> {
    let table = state
        .tree
        .retrieve_instance(table_path)
        .ok_or_else(|| BusError::not_found(table_path))?;
    let (table_name, handler) = {
        let node = state.tree.get(table).ok_or_else(|| BusError::not_found(table_path))?;
        if !node.kind().is_table() {
            return Err(BusError::WrongKind {
                element: table_path.to_string(),
                expected: "table".to_string(),
                actual: node.kind().to_string(),
            });
        }
        (node.full_name().to_string(), node.handler().cloned())
    };

    if let Some(alias) = alias {
        if parse_alias(&format!("[{alias}]")).is_none() {
            return Err(BusError::InvalidName {
                name: alias.to_string(),
                reason: "alias must be non-empty and free of brackets and dots".to_string(),
            });
        }
        if state.tree.row_by_alias(table, alias).is_some() {
            return Err(BusError::DuplicateName {
                name: format!("{table_name}.[{alias}]"),
            });
        }
    }

    let handler = handler.ok_or_else(|| BusError::Unsupported {
        operation: "add_row".to_string(),
        element: table_name.clone(),
    })?;
    let number = handler
        .add_row(&table_name, alias)
        .map_err(|e| BusError::from_provider(e, "add_row", &table_name))?;
    if state.tree.row_by_number(table, &number.to_string()).is_some() {
        return Err(BusError::DuplicateName {
            name: format!("{table_name}.{number}"),
        });
    }

    let row = state.tree.instantiate_row(table, number, alias)?;
    let bound = state.subscriptions.on_row_added(&mut state.tree, row);
    // Every node in the row is new, so any auto-publish binding is a first one.
    state.start_monitoring(bridge, bound.iter().map(|b| b.node));

    let row_name = state.tree.full_name(row).unwrap_or_default().to_string();
    let deliveries = dispatch::lifecycle_deliveries(&state.tree, &state.subscriptions, table, Some(row));
    debug!(row = %row_name, bindings = bound.len(), listeners = deliveries.len(), "row added");

    Ok((
        number,
        RowOutcome {
            deliveries,
            payload: EventPayload::RowCreated {
                row_name,
                instance_number: number,
                alias: alias.map(str::to_string),
            },
        },
    ))
}

pub(super) fn remove_row(state: &mut BusState, bridge: &dyn ValueChangeBridge, row_path: &str) -> BusResult<RowOutcome> {
    let row = state
        .tree
        .retrieve_instance(row_path)
        .ok_or_else(|| BusError::not_found(row_path))?;
    let table = state
        .tree
        .get(row)
        .and_then(|n| n.parent())
        .filter(|&p| state.tree.get(p).is_some_and(|t| t.kind().is_table()))
        .ok_or_else(|| BusError::WrongKind {
            element: row_path.to_string(),
            expected: "table row".to_string(),
            actual: state
                .tree
                .get(row)
                .map_or_else(String::new, |n| n.kind().to_string()),
        })?;

    let row_name = state.tree.full_name(row).unwrap_or_default().to_string();
    let handler = state
        .tree
        .get(table)
        .and_then(|t| t.handler().cloned())
        .ok_or_else(|| BusError::Unsupported {
            operation: "remove_row".to_string(),
            element: row_name.clone(),
        })?;
    handler
        .remove_row(&row_name)
        .map_err(|e| BusError::from_provider(e, "remove_row", &row_name))?;

    // Row subscribers are collected while the row still carries its bindings.
    let deliveries = dispatch::lifecycle_deliveries(&state.tree, &state.subscriptions, table, Some(row));

    // Monitor decisions read the bindings, so stop before unbinding.
    let nodes = state.tree.subtree(row);
    state.stop_monitoring(bridge, nodes);
    let unbound = state.subscriptions.on_row_removed(&mut state.tree, row);
    let released = state.tree.delete_row(row);
    state.subscriptions.release(&released);

    debug!(row = %row_name, unbound = unbound.len(), freed = released.len(), "row removed");

    Ok(RowOutcome {
        deliveries,
        payload: EventPayload::RowDeleted { row_name },
    })
}
