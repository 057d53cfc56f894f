//! Shutdown fan-out for the long-running tasks.

use tokio::sync::broadcast;
use tracing::{error, info};

/// One sender, one receiver per task (listener, health monitor, metrics).
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Notify every subscriber. Returns how many were listening.
    pub fn shutdown(&self) -> usize {
        self.sender.send(()).unwrap_or(0)
    }

    /// Wait for Ctrl+C, then notify every subscriber.
    pub async fn on_ctrl_c(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
        self.shutdown();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
