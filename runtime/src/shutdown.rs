//! Drain signalling.
//!
//! A [`DrainTrigger`] raises the drain signal once; every [`DrainSignal`] clone
//! observes it. Built on a `watch<bool>` so late subscribers still see a signal
//! raised before they started waiting.

use tokio::sync::watch;

/// Create a connected trigger/signal pair.
#[must_use]
pub fn drain_channel() -> (DrainTrigger, DrainSignal) {
    let (tx, rx) = watch::channel(false);
    (DrainTrigger { tx }, DrainSignal { rx })
}

/// Raises the drain signal.
#[derive(Debug)]
pub struct DrainTrigger {
    tx: watch::Sender<bool>,
}

impl DrainTrigger {
    /// Ask every holder of a [`DrainSignal`] to drain.
    pub fn drain(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("Drain requested");
        }
    }

    /// Another signal observing this trigger.
    #[must_use]
    pub fn subscribe(&self) -> DrainSignal {
        DrainSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes the drain signal.
#[derive(Debug, Clone)]
pub struct DrainSignal {
    rx: watch::Receiver<bool>,
}

impl DrainSignal {
    /// Wrap an existing `watch` receiver.
    #[must_use]
    pub const fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Whether drain has been requested.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once drain is requested.
    ///
    /// If the trigger is dropped without draining, this never resolves.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|draining| *draining).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_observes_earlier_drain() {
        let (trigger, mut signal) = drain_channel();
        trigger.drain();

        assert!(signal.is_draining());
        let waited = tokio::time::timeout(Duration::from_millis(100), signal.wait()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn dropped_trigger_never_drains() {
        let (trigger, mut signal) = drain_channel();
        drop(trigger);

        let waited = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(waited.is_err());
        assert!(!signal.is_draining());
    }

    #[tokio::test]
    async fn subscribers_share_the_signal() {
        let (trigger, signal) = drain_channel();
        let other = trigger.subscribe();
        trigger.drain();

        assert!(signal.is_draining());
        assert!(other.is_draining());
    }
}
