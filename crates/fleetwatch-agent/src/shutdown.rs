//! Cooperative cancellation for the agent loop
//!
//! The loop never spins: it suspends on [`Shutdown::sleep`], which wakes either when
//! the interval expires or when the [`ShutdownTrigger`] fires.

use crate::error::{AgentError, AgentResult};
use std::time::Duration;
use tokio::sync::watch;

/// Create a linked trigger/handle pair
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Fires the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown; every waiting [`Shutdown::sleep`] returns immediately
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

/// Observes the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`, or return `Err(Cancelled)` as soon as shutdown fires
    pub async fn sleep(&mut self, duration: Duration) -> AgentResult<()> {
        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.rx.wait_for(|cancelled| *cancelled) => Err(AgentError::Cancelled),
        }
    }
}
