//! Element kinds and provider capabilities.
//!
//! A provider registers elements by path and attaches an [`ElementHandler`] to
//! each. The namespace tree stores the handler as an opaque `Arc` and never
//! invokes it; calls are forwarded by the bus layer and the row orchestrator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::subscription::Filter;
use crate::value::Value;

/// Name of the synthetic row template child of every table.
pub const ROW_TEMPLATE: &str = "{i}";

/// Kind of a namespace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Groups children. Carries no capabilities.
    Container,
    /// Repeatable rows built from a `{i}` template.
    Table,
    /// Readable and possibly writable value.
    Property,
    /// Provider-fired notification.
    Event,
    /// Invocable method.
    Method,
}

impl ElementKind {
    /// Returns true for the grouping kind.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Container)
    }

    /// Returns true for tables.
    #[must_use]
    pub const fn is_table(self) -> bool {
        matches!(self, Self::Table)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Container => "container",
            Self::Table => "table",
            Self::Property => "property",
            Self::Event => "event",
            Self::Method => "method",
        };
        f.write_str(s)
    }
}

/// Whether a subscribe notification is for a new or a dropped subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeAction {
    Subscribe,
    Unsubscribe,
}

/// Provider capability set attached to a non-container element.
///
/// Every method has a default, so providers implement only what the element
/// supports. Handlers are called with the concrete instance name.
///
/// Row add/remove callbacks run while the bus holds its state lock. They must
/// not call back into the same bus.
pub trait ElementHandler: Send + Sync {
    /// Reads a property value.
    fn get(&self, _name: &str) -> Result<Value, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Writes a property value.
    fn set(&self, _name: &str, _value: &Value, _session: u32, _commit: bool) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Allocates a row in `table_name` and returns its instance number.
    fn add_row(&self, _table_name: &str, _alias: Option<&str>) -> Result<u32, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Releases the row named `row_name`.
    fn remove_row(&self, _row_name: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Observes subscribe/unsubscribe on this element.
    ///
    /// Returns whether the bus should auto-publish value changes for the
    /// subscription. The default lets the bus poll for changes.
    fn event_subscribe(
        &self,
        _action: SubscribeAction,
        _event_name: &str,
        _filter: Option<&Filter>,
        _interval: Option<Duration>,
    ) -> Result<bool, ProviderError> {
        Ok(true)
    }

    /// Invokes a method.
    fn invoke_method(&self, _name: &str, _input: &Value) -> Result<Value, ProviderError> {
        Err(ProviderError::Unsupported)
    }
}

/// Shared handle to a provider capability set.
pub type HandlerRef = Arc<dyn ElementHandler>;

/// Handler with no capabilities, for elements whose provider only publishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapabilities;

impl ElementHandler for NoCapabilities {}

/// One element of a registration batch.
#[derive(Clone)]
pub struct ElementSpec {
    /// Registration path, e.g. `Device.WiFi.AP.{i}.SSID` or `Device.WiFi.AP.{i}.`.
    pub name: String,
    /// Element kind.
    pub kind: ElementKind,
    /// Capability set.
    pub handler: HandlerRef,
}

impl ElementSpec {
    /// Creates a spec.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ElementKind, handler: HandlerRef) -> Self {
        Self {
            name: name.into(),
            kind,
            handler,
        }
    }

    /// Property spec.
    #[must_use]
    pub fn property(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self::new(name, ElementKind::Property, handler)
    }

    /// Table spec.
    #[must_use]
    pub fn table(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self::new(name, ElementKind::Table, handler)
    }

    /// Event spec.
    #[must_use]
    pub fn event(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self::new(name, ElementKind::Event, handler)
    }

    /// Method spec.
    #[must_use]
    pub fn method(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self::new(name, ElementKind::Method, handler)
    }
}

impl fmt::Debug for ElementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
