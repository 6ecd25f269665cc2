//! Startup wiring for the session components.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use pairlink_capability::{event_channel, MessagingCapability};
use pairlink_core::{Error, Result};

use crate::gate::RequestGate;
use crate::machine::{load_restore_hint, ConnectionStateMachine, PairingOutput, StateHandle};
use crate::pairing::PairingBroker;
use crate::store::SessionStore;

/// A running state machine together with the capability it listens to.
pub struct SessionRuntime {
    handle: StateHandle,
    broker: Arc<PairingBroker>,
    capability: Arc<dyn MessagingCapability>,
    machine: JoinHandle<()>,
}

impl SessionRuntime {
    /// Start the state machine and initialize the capability.
    ///
    /// A persisted credential, if readable, is handed to the capability as a
    /// restoration hint. The state starts at `initializing` either way.
    pub async fn start(
        store: Arc<dyn SessionStore>,
        capability: Arc<dyn MessagingCapability>,
        output: PairingOutput,
        image_size: u32,
    ) -> Result<Self> {
        let hint = load_restore_hint(store.as_ref()).await;

        let broker = Arc::new(PairingBroker::new(image_size));
        let (events_tx, events_rx) = event_channel();
        let (machine, handle) =
            ConnectionStateMachine::new(store, broker.clone(), output, events_rx);
        let machine = machine.spawn();

        info!(capability = capability.name(), "Initializing messaging capability");
        if let Err(e) = capability.initialize(hint, events_tx).await {
            machine.abort();
            return Err(Error::from(e));
        }

        Ok(Self {
            handle,
            broker,
            capability,
            machine,
        })
    }

    pub fn handle(&self) -> &StateHandle {
        &self.handle
    }

    pub fn broker(&self) -> &Arc<PairingBroker> {
        &self.broker
    }

    pub fn capability(&self) -> &Arc<dyn MessagingCapability> {
        &self.capability
    }

    pub fn gate(&self) -> RequestGate {
        RequestGate::new(self.handle.clone())
    }

    /// Shut the capability down and stop the state machine.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down messaging capability");
        let result = self.capability.shutdown().await.map_err(Error::from);
        self.machine.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileSessionStore;
    use pairlink_capability::{CapabilityError, LoopbackCapability};
    use pairlink_core::{ConnectionState, SessionCredential};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn settle(runtime: &SessionRuntime) -> ConnectionState {
        tokio::time::timeout(Duration::from_secs(5), runtime.handle().settle())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_start_awaits_pairing() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::new(tmp.path().join("session.json")));
        let capability = Arc::new(LoopbackCapability::auto_pairing());

        let runtime = SessionRuntime::start(store, capability.clone(), PairingOutput::default(), 64)
            .await
            .unwrap();

        assert_eq!(settle(&runtime).await, ConnectionState::AwaitingPairing);
        assert!(runtime.broker().get().is_some());
        assert!(capability.restored().is_none());
        assert!(!runtime.gate().admit().is_proceed());
    }

    #[tokio::test]
    async fn test_restart_restores_persisted_session() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        FileSessionStore::new(&path)
            .save(&SessionCredential::new(b"C1".to_vec()))
            .await
            .unwrap();

        let capability = Arc::new(LoopbackCapability::auto_pairing());
        let runtime = SessionRuntime::start(
            Arc::new(FileSessionStore::new(&path)),
            capability.clone(),
            PairingOutput::default(),
            64,
        )
        .await
        .unwrap();

        assert_eq!(settle(&runtime).await, ConnectionState::Connected);
        assert_eq!(capability.restored(), Some(SessionCredential::new(b"C1".to_vec())));
        assert!(runtime.gate().admit().is_proceed());
    }

    #[tokio::test]
    async fn test_corrupt_record_starts_unpaired() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, b"{{{{").unwrap();

        let capability = Arc::new(LoopbackCapability::auto_pairing());
        let runtime = SessionRuntime::start(
            Arc::new(FileSessionStore::new(&path)),
            capability.clone(),
            PairingOutput::default(),
            64,
        )
        .await
        .unwrap();

        assert!(capability.restored().is_none());
        assert_eq!(settle(&runtime).await, ConnectionState::AwaitingPairing);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_returned() {
        let tmp = TempDir::new().unwrap();
        let capability = Arc::new(LoopbackCapability::new());
        capability.fail_next(CapabilityError::protocol("helper refused"));

        let result = SessionRuntime::start(
            Arc::new(FileSessionStore::new(tmp.path().join("session.json"))),
            capability,
            PairingOutput::default(),
            64,
        )
        .await;
        assert!(matches!(result, Err(Error::Capability(_))));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let tmp = TempDir::new().unwrap();
        let runtime = SessionRuntime::start(
            Arc::new(FileSessionStore::new(tmp.path().join("session.json"))),
            Arc::new(LoopbackCapability::new()),
            PairingOutput::default(),
            64,
        )
        .await
        .unwrap();
        runtime.shutdown().await.unwrap();
    }
}
