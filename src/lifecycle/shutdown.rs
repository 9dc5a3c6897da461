//! Shutdown coordination for the sink.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Two stages: a broadcast that asks long-running tasks to stop taking new
/// work, and an abort token that cancels whatever is still running once the
/// grace period is over.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    abort: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            abort: CancellationToken::new(),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Token cancelled when in-flight work must stop immediately.
    ///
    /// Sessions hold child tokens of this one.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
