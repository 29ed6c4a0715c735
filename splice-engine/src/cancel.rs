//! Cooperative cancellation
//!
//! A `Cancellation` is a cloneable flag backed by a `tokio::sync::watch`
//! channel. Any clone can trip it; every clone observes it. Timeouts are
//! expressed as a cancellation that trips itself after a delay, so the engine
//! treats expiry exactly like an explicit cancel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trips the flag; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag has been tripped
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender is owned by `self`, so this only happens during teardown
                std::future::pending::<()>().await;
            }
        }
    }

    /// Trips the flag after `timeout` unless it was tripped earlier
    pub fn cancel_after(&self, timeout: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => this.cancel(),
                _ = this.cancelled() => {}
            }
        });
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
