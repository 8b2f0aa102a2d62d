#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use elembus::{
    Bus, BusConfig, ChannelTransport, ElementHandler, ElementSpec, Filter, HandlerRef, MonitorTarget, NodeId,
    ProviderError, SubscribeAction, Value, ValueChangeBridge,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory provider backing every element kind.
#[derive(Default)]
pub struct Provider {
    values: Mutex<HashMap<String, Value>>,
    next_row: AtomicU32,
    pub refuse_rows: AtomicBool,
    pub manual_publish: AtomicBool,
    pub subscribe_log: Mutex<Vec<(SubscribeAction, String)>>,
    pub removed_rows: Mutex<Vec<String>>,
}

impl Provider {
    pub fn handler() -> (Arc<Self>, HandlerRef) {
        let provider = Arc::new(Self::default());
        let handler: HandlerRef = provider.clone();
        (provider, handler)
    }

    pub fn put(&self, name: &str, value: Value) {
        self.values.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.values.lock().unwrap().get(name).cloned()
    }
}

impl ElementHandler for Provider {
    fn get(&self, name: &str) -> Result<Value, ProviderError> {
        Ok(self.values.lock().unwrap().get(name).cloned().unwrap_or_default())
    }

    fn set(&self, name: &str, value: &Value, _session: u32, _commit: bool) -> Result<(), ProviderError> {
        if name.ends_with("ReadOnly") {
            return Err(ProviderError::rejected("read-only"));
        }
        self.put(name, value.clone());
        Ok(())
    }

    fn add_row(&self, _table_name: &str, _alias: Option<&str>) -> Result<u32, ProviderError> {
        if self.refuse_rows.load(Ordering::SeqCst) {
            return Err(ProviderError::rejected("table full"));
        }
        Ok(self.next_row.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn remove_row(&self, row_name: &str) -> Result<(), ProviderError> {
        if self.refuse_rows.load(Ordering::SeqCst) {
            return Err(ProviderError::rejected("row busy"));
        }
        self.removed_rows.lock().unwrap().push(row_name.to_string());
        Ok(())
    }

    fn event_subscribe(
        &self,
        action: SubscribeAction,
        event_name: &str,
        _filter: Option<&Filter>,
        _interval: Option<Duration>,
    ) -> Result<bool, ProviderError> {
        self.subscribe_log.lock().unwrap().push((action, event_name.to_string()));
        Ok(!self.manual_publish.load(Ordering::SeqCst))
    }

    fn invoke_method(&self, name: &str, input: &Value) -> Result<Value, ProviderError> {
        Ok(Value::Structured(serde_json::json!({
            "method": name,
            "echo": serde_json::to_value(input).unwrap_or_default(),
        })))
    }
}

/// Bridge that records start/stop calls instead of polling.
#[derive(Default)]
pub struct RecordingBridge {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingBridge {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ValueChangeBridge for RecordingBridge {
    fn start_monitoring(&self, target: MonitorTarget) {
        self.calls.lock().unwrap().push(format!("start {}", target.name));
    }

    fn stop_monitoring(&self, node: NodeId) {
        self.calls.lock().unwrap().push(format!("stop {node}"));
    }
}

pub fn fast_config() -> BusConfig {
    BusConfig {
        poll_interval_ms: 10,
        listener_queue_capacity: 64,
        ..BusConfig::default()
    }
}

/// `Device.T.{i}.` with property `P`, on a polling bus.
pub fn table_bus() -> (Arc<Bus>, Arc<ChannelTransport>, Arc<Provider>) {
    init_tracing();
    let config = fast_config();
    let transport = Arc::new(ChannelTransport::from_config(&config));
    let bus = Bus::open("test", config, transport.clone()).unwrap();
    let (provider, handler) = Provider::handler();
    bus.register_elements(&[
        ElementSpec::table("Device.T.{i}.", handler.clone()),
        ElementSpec::property("Device.T.{i}.P", handler),
    ])
    .unwrap();
    (bus, transport, provider)
}

/// Same tree as [`table_bus`], with a recording bridge.
pub fn recorded_bus() -> (Arc<Bus>, Arc<ChannelTransport>, Arc<Provider>, Arc<RecordingBridge>) {
    init_tracing();
    let config = fast_config();
    let transport = Arc::new(ChannelTransport::from_config(&config));
    let bridge = Arc::new(RecordingBridge::default());
    let bus = Bus::with_bridge("test", config, transport.clone(), bridge.clone()).unwrap();
    let (provider, handler) = Provider::handler();
    bus.register_elements(&[
        ElementSpec::table("Device.T.{i}.", handler.clone()),
        ElementSpec::property("Device.T.{i}.P", handler),
    ])
    .unwrap();
    (bus, transport, provider, bridge)
}
