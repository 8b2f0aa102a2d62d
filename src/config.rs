//! Bus configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

/// Tunables for one bus handle. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Poll interval for auto-published properties without a subscriber hint.
    pub poll_interval_ms: u64,
    /// Max queued start/stop requests for the polling worker.
    pub monitor_queue_capacity: usize,
    /// Per-listener buffer of the in-process transport.
    pub listener_queue_capacity: usize,
    /// Max number of segments in a registered path.
    pub max_path_depth: usize,
    /// Max length of a registered path in bytes.
    pub max_name_length: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            monitor_queue_capacity: 1024,
            listener_queue_capacity: 1024,
            max_path_depth: 32,
            max_name_length: 256,
        }
    }
}

impl BusConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(content: &str) -> BusResult<Self> {
        let cfg: Self = serde_json::from_str(content).map_err(|e| BusError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> BusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BusError::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> BusResult<()> {
        let invalid = |reason: &str| {
            Err(BusError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive");
        }
        if self.monitor_queue_capacity == 0 || self.listener_queue_capacity == 0 {
            return invalid("queue capacities must be positive");
        }
        if self.max_path_depth == 0 || self.max_name_length == 0 {
            return invalid("path limits must be positive");
        }
        Ok(())
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
