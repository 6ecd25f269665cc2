//! Lifecycle event channel.
//!
//! The capability holds the sending half; the state machine is the only
//! receiver. Events keep the order in which they were emitted.

use tokio::sync::mpsc;
use tracing::warn;

use pairlink_core::LifecycleEvent;

/// Sending half handed to the capability on `initialize`.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl EventSender {
    /// Emit an event. Returns `false` if nobody is listening any more.
    pub fn emit(&self, event: LifecycleEvent) -> bool {
        let name = event.name();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                warn!(event = name, "Lifecycle event dropped, state machine has stopped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half consumed by the state machine.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected sender/receiver pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_core::PairingToken;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = event_channel();
        assert!(tx.emit(LifecycleEvent::PairingTokenIssued(PairingToken::new("T1"))));
        assert!(tx.emit(LifecycleEvent::disconnected("network")));

        assert_eq!(rx.recv().await.unwrap().name(), "pairing-token-issued");
        assert_eq!(rx.recv().await.unwrap().name(), "disconnected");
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (tx, rx) = event_channel();
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.emit(LifecycleEvent::auth_failed("gone")));
    }
}
