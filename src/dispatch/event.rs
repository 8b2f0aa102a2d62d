//! Event types delivered to listeners.
//!
//! Events are serializable so a transport can put them on any wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Discriminant of an [`EventPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ValueChanged,
    RowCreated,
    RowDeleted,
    General,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ValueChanged => "value_changed",
            Self::RowCreated => "row_created",
            Self::RowDeleted => "row_deleted",
            Self::General => "general",
        };
        f.write_str(s)
    }
}

/// What happened.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// An auto-published property changed.
    ValueChanged { element: String, value: Value },

    /// A table row was created.
    RowCreated {
        row_name: String,
        instance_number: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },

    /// A table row was deleted.
    RowDeleted { row_name: String },

    /// A provider fired an event element.
    General { element: String, data: Value },
}

impl EventPayload {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ValueChanged { .. } => EventKind::ValueChanged,
            Self::RowCreated { .. } => EventKind::RowCreated,
            Self::RowDeleted { .. } => EventKind::RowDeleted,
            Self::General { .. } => EventKind::General,
        }
    }

    /// Concrete element the payload refers to.
    #[must_use]
    pub fn element(&self) -> &str {
        match self {
            Self::ValueChanged { element, .. } | Self::General { element, .. } => element,
            Self::RowCreated { row_name, .. } | Self::RowDeleted { row_name } => row_name,
        }
    }
}

/// An event as delivered to one listener.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_id: Uuid,
    /// The name the listener subscribed with, not the concrete element.
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl BusEvent {
    #[must_use]
    pub fn new(event_name: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_name: event_name.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
