//! Fan-out engine.
//!
//! State changes are queued on the [`FanoutQueue`] and flushed by a single
//! debounced task: multiple changes inside one debounce window produce at
//! most one broadcast per viewer. Snapshot mode rebuilds each viewer's
//! personalized `userList`; delta mode publishes per-target `u`/`o`/`x`
//! frames to subscribed sessions. Every committed change is reflected in
//! some later broadcast within debounce + heartbeat.

pub mod delta;
pub mod snapshot;

use crate::config::FanoutMode;
use crate::state::Broker;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// A come-online or go-offline transition awaiting delta publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeEvent {
    /// Handle transitioned offline -> online.
    Online(String),
    /// Handle transitioned online -> offline (presence record expired).
    Offline(String),
}

/// Pending fan-out work, drained once per debounce window.
#[derive(Debug, Default)]
pub struct FanoutWork {
    /// Handles whose presence changed.
    pub dirty: Vec<String>,
    /// Whether the contact graph or preferences changed (forces a
    /// subscription recompute in delta mode).
    pub resync: bool,
    /// Online/offline transitions, in arrival order.
    pub edges: Vec<EdgeEvent>,
}

impl FanoutWork {
    /// Whether there is anything to flush.
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && !self.resync && self.edges.is_empty()
    }
}

/// Debounced fan-out queue. Writers mark work and return immediately; the
/// fan-out task drains everything after the debounce window.
pub struct FanoutQueue {
    dirty: DashSet<String>,
    resync: AtomicBool,
    edges: Mutex<Vec<EdgeEvent>>,
    notify: Notify,
    debounce: Duration,
}

impl FanoutQueue {
    /// Create a queue with the configured debounce window.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            dirty: DashSet::new(),
            resync: AtomicBool::new(false),
            edges: Mutex::new(Vec::new()),
            notify: Notify::new(),
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    /// The debounce window.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Queue a presence change for a handle.
    pub fn mark_presence(&self, handle: &str) {
        self.dirty.insert(handle.to_string());
        self.notify.notify_one();
    }

    /// Queue a contact-graph or preference change.
    pub fn mark_resync(&self) {
        self.resync.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Queue an online/offline transition.
    pub fn push_edge(&self, event: EdgeEvent) {
        self.edges.lock().push(event);
        self.notify.notify_one();
    }

    /// Wait until some work is queued.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Drain everything queued so far.
    pub fn take_work(&self) -> FanoutWork {
        let dirty: Vec<String> = self.dirty.iter().map(|h| h.clone()).collect();
        for handle in &dirty {
            self.dirty.remove(handle);
        }
        FanoutWork {
            dirty,
            resync: self.resync.swap(false, Ordering::Relaxed),
            edges: std::mem::take(&mut *self.edges.lock()),
        }
    }
}

/// Flush one batch of pending work. Exposed for tests, which drive cycles
/// directly instead of waiting out the debounce timer.
pub async fn run_cycle(broker: &Arc<Broker>) {
    let work = broker.fanout.take_work();
    if work.is_empty() {
        return;
    }
    debug!(
        dirty = work.dirty.len(),
        edges = work.edges.len(),
        resync = work.resync,
        "fan-out cycle"
    );
    crate::metrics::BROADCAST_CYCLES.inc();

    match broker.config.fanout.mode {
        FanoutMode::Snapshot => snapshot::broadcast_all(broker).await,
        FanoutMode::Delta => delta::flush(broker, work).await,
    }

    crate::metrics::ONLINE_USERS.set(broker.sessions.online_handles() as i64);
}

/// The debounced fan-out task. Runs until shutdown.
pub async fn run(broker: Arc<Broker>) {
    let mut shutdown_rx = broker.lifecycle.subscribe();
    loop {
        tokio::select! {
            _ = broker.fanout.wait() => {}
            _ = shutdown_rx.recv() => {
                info!("Fan-out task stopping");
                break;
            }
        }
        // Debounce: let further changes coalesce into this cycle.
        tokio::time::sleep(broker.fanout.debounce()).await;
        run_cycle(&broker).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_work_drains_and_coalesces() {
        let queue = FanoutQueue::new(2000);
        queue.mark_presence("alice");
        queue.mark_presence("alice");
        queue.mark_presence("bob");
        queue.mark_resync();
        queue.push_edge(EdgeEvent::Online("alice".to_string()));

        let work = queue.take_work();
        assert_eq!(work.dirty.len(), 2);
        assert!(work.resync);
        assert_eq!(work.edges, vec![EdgeEvent::Online("alice".to_string())]);

        assert!(queue.take_work().is_empty());
    }
}
