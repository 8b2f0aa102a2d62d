//! Polling worker.
//!
//! Start/stop requests arrive on a bounded control queue and never block the
//! caller. The worker reads each watched property at its interval and hands
//! changes to a sink; the sink returning false shuts the worker down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::tree::NodeId;
use crate::value::Value;

use super::{MonitorSignal, MonitorTarget, ValueChange, ValueChangeBridge};

#[derive(Debug)]
enum ControlMsg {
    Start(MonitorTarget),
    Stop(NodeId),
    Shutdown,
}

#[derive(Debug)]
struct Watched {
    target: MonitorTarget,
    every: Duration,
    next_due: Instant,
    last: Option<Value>,
}

impl Watched {
    fn new(target: MonitorTarget, default_every: Duration) -> Self {
        let every = target.interval.unwrap_or(default_every).max(Duration::from_millis(1));
        let mut w = Self {
            target,
            every,
            next_due: Instant::now() + every,
            last: None,
        };
        // Baseline read; only later differences are reported.
        w.last = w.read();
        w
    }

    fn read(&self) -> Option<Value> {
        match self.target.handler.get(&self.target.name) {
            Ok(v) => Some(v),
            Err(err) => {
                debug!(element = %self.target.name, error = %err, "monitor read failed");
                None
            }
        }
    }

    fn poll(&mut self, now: Instant) -> Option<ValueChange> {
        self.next_due = now + self.every;
        let value = self.read()?;
        if self.last.as_ref() == Some(&value) {
            return None;
        }
        let changed = self.last.is_some();
        self.last = Some(value.clone());
        changed.then(|| ValueChange {
            node: self.target.node,
            name: self.target.name.clone(),
            value,
        })
    }
}

/// Polling implementation of [`ValueChangeBridge`].
#[derive(Debug)]
pub struct PollingMonitor {
    control_tx: Sender<ControlMsg>,
    dropped_requests: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl PollingMonitor {
    /// Spawns the worker. `sink` receives every signal on the worker thread.
    pub fn spawn<F>(cfg: &BusConfig, sink: F) -> BusResult<Self>
    where
        F: Fn(MonitorSignal) -> bool + Send + 'static,
    {
        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.monitor_queue_capacity.max(1));
        let default_every = cfg.poll_interval();
        let join = thread::Builder::new()
            .name("elembus-monitor".to_string())
            .spawn(move || worker_loop(default_every, &control_rx, &sink))
            .map_err(|e| BusError::internal(format!("failed to spawn monitor worker: {e}")))?;

        Ok(Self {
            control_tx,
            dropped_requests: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        })
    }

    /// Start/stop requests lost to a full or closed control queue.
    #[must_use]
    pub fn dropped_requests(&self) -> u64 {
        self.dropped_requests.load(Ordering::Relaxed)
    }

    fn request(&self, msg: ControlMsg) {
        match self.control_tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg) | TrySendError::Disconnected(msg)) => {
                self.dropped_requests.fetch_add(1, Ordering::Relaxed);
                warn!(request = ?msg, "monitor request dropped");
            }
        }
    }
}

impl ValueChangeBridge for PollingMonitor {
    fn start_monitoring(&self, target: MonitorTarget) {
        self.request(ControlMsg::Start(target));
    }

    fn stop_monitoring(&self, node: NodeId) {
        self.request(ControlMsg::Stop(node));
    }
}

impl Drop for PollingMonitor {
    fn drop(&mut self) {
        let _ = self.control_tx.try_send(ControlMsg::Shutdown);
        let (dummy_tx, _) = bounded::<ControlMsg>(1);
        drop(std::mem::replace(&mut self.control_tx, dummy_tx));

        // Detach rather than join: the last bus handle may be released by the
        // worker itself from inside the sink.
        if let Ok(mut guard) = self.join.lock() {
            drop(guard.take());
        }
    }
}

fn worker_loop(default_every: Duration, control_rx: &Receiver<ControlMsg>, sink: &dyn Fn(MonitorSignal) -> bool) {
    let mut watched: HashMap<NodeId, Watched> = HashMap::new();

    loop {
        let now = Instant::now();
        let timeout = watched
            .values()
            .map(|w| w.next_due.saturating_duration_since(now))
            .min()
            .unwrap_or(default_every)
            .min(default_every);

        select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::Start(target)) => {
                        watched
                            .entry(target.node)
                            .or_insert_with(|| Watched::new(target, default_every));
                    }
                    Ok(ControlMsg::Stop(node)) => {
                        watched.remove(&node);
                    }
                    Ok(ControlMsg::Shutdown) | Err(_) => break,
                }
            }
            default(timeout) => {
                let now = Instant::now();
                let changes: Vec<ValueChange> = watched
                    .values_mut()
                    .filter(|w| w.next_due <= now)
                    .filter_map(|w| w.poll(now))
                    .collect();
                trace!(watched = watched.len(), changed = changes.len(), "monitor tick");
                for change in changes {
                    if !sink(MonitorSignal::ValueChanged(change)) {
                        return;
                    }
                }
                if !sink(MonitorSignal::Tick) {
                    return;
                }
            }
        }
    }
}
