//! Process-wide registry of open bus handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::info;

use crate::config::BusConfig;
use crate::dispatch::EventTransport;
use crate::error::{BusError, BusResult};

use super::Bus;

/// Open bus handles keyed by component name.
#[derive(Debug, Default)]
pub struct BusRegistry {
    buses: Mutex<HashMap<String, Arc<Bus>>>,
}

impl BusRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<BusRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    fn buses(&self) -> BusResult<MutexGuard<'_, HashMap<String, Arc<Bus>>>> {
        self.buses
            .lock()
            .map_err(|_| BusError::internal("bus registry lock poisoned"))
    }

    /// Opens a bus for `component`. A component can hold one open handle.
    pub fn open(
        &self,
        component: &str,
        config: BusConfig,
        transport: Arc<dyn EventTransport>,
    ) -> BusResult<Arc<Bus>> {
        let mut buses = self.buses()?;
        if buses.contains_key(component) {
            return Err(BusError::DuplicateName {
                name: component.to_string(),
            });
        }
        let bus = Bus::open(component, config, transport)?;
        buses.insert(component.to_string(), Arc::clone(&bus));
        info!(component, open = buses.len(), "bus registered");
        Ok(bus)
    }

    /// Handle of an open component.
    pub fn get(&self, component: &str) -> Option<Arc<Bus>> {
        self.buses().ok()?.get(component).cloned()
    }

    /// Closes a component's handle. The bus shuts down once the last clone of
    /// the handle is dropped.
    pub fn close(&self, component: &str) -> BusResult<()> {
        let removed = self.buses()?.remove(component);
        match removed {
            Some(_) => {
                info!(component, "bus unregistered");
                Ok(())
            }
            None => Err(BusError::not_found(component)),
        }
    }

    /// Names of the open components, sorted.
    pub fn components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .buses()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ChannelTransport;

    #[test]
    fn open_get_close() {
        let registry = BusRegistry::new();
        let transport = Arc::new(ChannelTransport::default());
        let bus = registry.open("wifi", BusConfig::default(), transport.clone()).unwrap();
        assert_eq!(bus.component(), "wifi");
        assert!(Arc::ptr_eq(&registry.get("wifi").unwrap(), &bus));

        let err = registry.open("wifi", BusConfig::default(), transport).unwrap_err();
        assert!(matches!(err, BusError::DuplicateName { .. }));
        assert_eq!(registry.components(), vec!["wifi"]);

        registry.close("wifi").unwrap();
        assert!(registry.get("wifi").is_none());
        assert!(registry.close("wifi").unwrap_err().is_not_found());
    }

    #[test]
    fn global_is_shared() {
        let a = BusRegistry::global();
        let b = BusRegistry::global();
        assert!(std::ptr::eq(a, b));
    }
}
