//! Process-wide shutdown signal for in-flight bootstrap work.

use tokio::sync::watch;

/// Creates a connected trigger and signal.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signals every receiver to stop. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes the shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Returns a signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes when shutdown is requested.
    ///
    /// If the trigger is dropped without firing, this never completes.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_completes_after_trigger() {
        let (trigger, signal) = shutdown_channel();
        assert!(!signal.is_shutdown());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        trigger.shutdown();
        waiter.await.unwrap();
        assert!(signal.is_shutdown());

        // Already fired: completes immediately.
        signal.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let signal = ShutdownSignal::never();
        let fired = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(fired.is_err());
    }
}
