//! Process-wide shutdown signal
//!
//! One [`ShutdownTrigger`] fans out to any number of [`Shutdown`] listeners.
//! Async loops `select!` on [`Shutdown::wait`]; the capture thread polls
//! [`Shutdown::is_triggered`] once per frame.

use std::sync::Arc;

use tokio::sync::watch;

/// Fires the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    #[must_use]
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, Shutdown { rx })
    }

    /// Ask every listener to stop; repeated calls are harmless
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("shutdown requested");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Shutdown {
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (or every trigger is gone)
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_all_listeners() {
        let (trigger, mut first) = ShutdownTrigger::new();
        let mut second = trigger.subscribe();
        assert!(!first.is_triggered());

        trigger.trigger();
        trigger.trigger();

        first.wait().await;
        second.wait().await;
        assert!(second.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_returns_when_trigger_dropped() {
        let (trigger, mut shutdown) = ShutdownTrigger::new();
        drop(trigger);
        shutdown.wait().await;
        assert!(!shutdown.is_triggered());
    }
}
