//! # elembus - a process-local element bus
//!
//! Providers register a hierarchical namespace of elements: properties,
//! events, methods and tables of repeatable rows. Consumers subscribe to value
//! changes and row lifecycle events using wildcard, alias or partial-path
//! patterns.
//!
//! ## Core Concepts
//!
//! - **Namespace tree**: schema and live instances in one arena. Each table
//!   owns a `{i}` row template that every row is copied from.
//! - **Pattern**: a subscription event name such as `Device.WiFi.AP.*.SSID`,
//!   parsed once against the registration path.
//! - **Subscription registry**: binds patterns to concrete nodes and keeps the
//!   binding current as rows come and go.
//! - **Bus**: the per-component handle serializing all of the above.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use elembus::{Bus, BusConfig, ChannelTransport, ElementSpec, SubscriptionRequest};
//!
//! let config = BusConfig::default();
//! let transport = Arc::new(ChannelTransport::from_config(&config));
//! let bus = Bus::open("wifi", config, transport.clone())?;
//! bus.register_elements(&[
//!     ElementSpec::table("Device.WiFi.AP.{i}.", handler.clone()),
//!     ElementSpec::property("Device.WiFi.AP.{i}.SSID", handler.clone()),
//! ])?;
//!
//! let events = transport.connect("ui")?;
//! bus.subscribe(SubscriptionRequest::new("ui", "Device.WiFi.AP.*.SSID"))?;
//! bus.add_row("Device.WiFi.AP.", Some("guest"))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core: namespace, patterns, subscriptions
pub mod element;
pub mod error;
pub mod pattern;
pub mod subscription;
pub mod tree;
pub mod value;

// Delivery and monitoring
pub mod dispatch;
pub mod monitor;

// Bus handle
pub mod bus;
pub mod config;

// Re-export primary types at crate root for convenience
pub use bus::{Bus, BusRegistry};
pub use config::BusConfig;
pub use dispatch::{BusEvent, ChannelTransport, EventKind, EventPayload, EventTransport, ListenerStream};
pub use element::{ElementHandler, ElementKind, ElementSpec, HandlerRef, NoCapabilities, SubscribeAction};
pub use error::{BusError, BusResult, ProviderError};
pub use monitor::{MonitorSignal, MonitorTarget, PollingMonitor, ValueChange, ValueChangeBridge};
pub use pattern::{Pattern, Token};
pub use subscription::{EventFilter, Filter, Subscription, SubscriptionId, SubscriptionRequest};
pub use tree::{ElementNode, NamespaceTree, NodeId};
pub use value::Value;
