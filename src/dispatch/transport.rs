//! Listener transports. The bus hands each delivery to an [`EventTransport`];
//! [`ChannelTransport`] keeps one bounded queue per listener in process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::warn;

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};

use super::BusEvent;

/// Delivers events to listener addresses.
///
/// Sends are fire-and-continue: the bus logs a failed send and moves on.
pub trait EventTransport: Send + Sync {
    /// Sends `event` to `listener`.
    fn send(&self, listener: &str, event: &BusEvent) -> BusResult<()>;
}

/// In-process transport with one bounded queue per listener.
///
/// Sends never block; events for a full queue are dropped and counted.
#[derive(Debug)]
pub struct ChannelTransport {
    capacity: usize,
    listeners: Mutex<HashMap<String, Sender<BusEvent>>>,
    dropped_events: AtomicU64,
}

impl ChannelTransport {
    /// Creates a transport whose listener queues hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            listeners: Mutex::new(HashMap::new()),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Sizes listener queues from `listener_queue_capacity`.
    #[must_use]
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.listener_queue_capacity)
    }

    /// Queue size for listeners connected from now on.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Opens the queue for `listener`, replacing any previous one.
    pub fn connect(&self, listener: impl Into<String>) -> BusResult<ListenerStream> {
        let listener = listener.into();
        let (tx, rx) = bounded::<BusEvent>(self.capacity);
        self.listeners
            .lock()
            .map_err(|_| BusError::internal("listener table lock poisoned"))?
            .insert(listener.clone(), tx);
        Ok(ListenerStream { listener, rx })
    }

    /// Closes the queue for `listener`. Returns false if it was not connected.
    pub fn disconnect(&self, listener: &str) -> bool {
        self.listeners
            .lock()
            .is_ok_and(|mut map| map.remove(listener).is_some())
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

impl EventTransport for ChannelTransport {
    fn send(&self, listener: &str, event: &BusEvent) -> BusResult<()> {
        let mut map = self
            .listeners
            .lock()
            .map_err(|_| BusError::internal("listener table lock poisoned"))?;
        let Some(tx) = map.get(listener) else {
            return Err(BusError::Disconnected {
                path: listener.to_string(),
            });
        };
        match tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(listener, event = %event.event_name, "listener queue full, event dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                map.remove(listener);
                Err(BusError::Disconnected {
                    path: listener.to_string(),
                })
            }
        }
    }
}

/// Receiving end of one listener's queue.
#[derive(Debug)]
pub struct ListenerStream {
    listener: String,
    rx: Receiver<BusEvent>,
}

impl ListenerStream {
    /// The listener address this stream receives for.
    #[must_use]
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> BusResult<BusEvent> {
        self.rx.recv().map_err(|_| BusError::Disconnected {
            path: self.listener.clone(),
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> BusResult<BusEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => BusError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => BusError::Disconnected {
                path: self.listener.clone(),
            },
        })
    }

    /// Next queued event, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }

    /// All currently queued events.
    #[must_use]
    pub fn drain(&self) -> Vec<BusEvent> {
        self.rx.try_iter().collect()
    }
}
