//! Cooperative cancellation shared by every long-running task.
//!
//! A single [`ShutdownTrigger`] fans out to any number of [`Shutdown`]
//! receivers. Every wait in the service goes through [`Shutdown::sleep`] so
//! that a fixed poll interval or reconnect backoff is cut short the moment
//! shutdown is requested.

use std::time::Duration;

use tokio::sync::watch;

/// Create a linked trigger/receiver pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Sending half; firing it is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown of every linked receiver.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// Create another receiver linked to this trigger.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half, cheap to clone into spawned tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has already been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested. A dropped trigger counts as a request.
    pub async fn recv(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// wait was cut short by shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.recv() => false,
        }
    }
}
