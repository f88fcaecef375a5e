//! Broadcast shutdown signal for harness workers.

use tokio::sync::watch;

/// Creates a connected shutdown channel pair.
///
/// The flag starts unset; calling [`ShutdownTx::shutdown`] latches it for every
/// current and future subscriber.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);

    (ShutdownTx(tx), ShutdownRx(rx))
}

/// Sending half of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Broadcasts shutdown to all subscribers.
    ///
    /// Fails only when every receiver has been dropped, which means there is nothing
    /// left to shut down.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send(true)
    }

    /// Creates a new receiver observing this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving half of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is requested.
    ///
    /// Returns immediately when shutdown was already requested. Also returns if the
    /// sender is dropped, since no shutdown can arrive after that. Cancel safe, so it
    /// can be used inside `select!` loops.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.0.clone();
        let _ = rx.wait_for(|shutdown| *shutdown).await;
    }
}
