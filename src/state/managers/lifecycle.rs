//! Process lifecycle state.
//!
//! Holds the shutdown broadcast channel. Background tasks subscribe and exit
//! when the signal handler (or a fatal store error) fires it.

use tokio::sync::broadcast;

/// Lifecycle management state.
pub struct LifecycleManager {
    /// Shutdown signal sender; subscribe for a receiver.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// A fresh receiver for a background task.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Fire the shutdown signal.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
