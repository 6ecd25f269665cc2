//! Admission control for operations that need a connected account.

use std::fmt;

use tracing::debug;

use pairlink_capability::MessagingCapability;
use pairlink_core::ConnectionState;

use crate::machine::StateHandle;

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Believed state at the time of the check
    pub state: ConnectionState,
    /// What the capability reported, when the live check failed
    pub detail: Option<String>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not connected (state: {})", self.state)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Reject(Rejection),
}

impl Admission {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Admission::Proceed)
    }

    /// `Ok` on `Proceed`, the rejection otherwise.
    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Admission::Proceed => Ok(()),
            Admission::Reject(r) => Err(r),
        }
    }
}

/// Lets a request through only while the account is connected.
#[derive(Debug, Clone)]
pub struct RequestGate {
    state: StateHandle,
}

impl RequestGate {
    pub fn new(state: StateHandle) -> Self {
        Self { state }
    }

    /// Check the believed state.
    pub fn admit(&self) -> Admission {
        let state = self.state.current();
        if state.is_connected() {
            Admission::Proceed
        } else {
            Admission::Reject(Rejection {
                state,
                detail: None,
            })
        }
    }

    /// Check the believed state and then ask the capability itself.
    ///
    /// Call right before the capability operation; the believed state is
    /// read again after the capability answers since it may have moved on
    /// in the meantime.
    pub async fn admit_live(&self, capability: &dyn MessagingCapability) -> Admission {
        if let Admission::Reject(r) = self.admit() {
            return Admission::Reject(r);
        }

        if capability.info().is_none() {
            return self.reject_with("account info not available yet");
        }

        match capability.get_state().await {
            Ok(remote) if remote.is_connected() => self.admit(),
            Ok(remote) => self.reject_with(format!("capability reports {}", remote)),
            Err(e) => {
                debug!(error = %e, "Capability state check failed");
                self.reject_with(format!("state check failed: {}", e))
            }
        }
    }

    fn reject_with(&self, detail: impl Into<String>) -> Admission {
        Admission::Reject(Rejection {
            state: self.state.current(),
            detail: Some(detail.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{ConnectionStateMachine, PairingOutput};
    use crate::pairing::PairingBroker;
    use crate::store::FileSessionStore;
    use pairlink_capability::{event_channel, CapabilityError, LoopbackCapability, RemoteState};
    use pairlink_core::{LifecycleEvent, PairingToken, SessionCredential};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn event_for(state: ConnectionState) -> Vec<LifecycleEvent> {
        let c = || SessionCredential::new(b"C1".to_vec());
        match state {
            ConnectionState::Initializing => vec![],
            ConnectionState::AwaitingPairing => {
                vec![LifecycleEvent::PairingTokenIssued(PairingToken::new("T1"))]
            }
            ConnectionState::AuthenticatedNotReady => vec![LifecycleEvent::Authenticated(c())],
            ConnectionState::Connected => vec![LifecycleEvent::Ready(c())],
            ConnectionState::Disconnected => {
                vec![LifecycleEvent::Ready(c()), LifecycleEvent::disconnected("x")]
            }
            ConnectionState::AuthFailed => vec![LifecycleEvent::auth_failed("x")],
        }
    }

    async fn machine_in(state: ConnectionState) -> (ConnectionStateMachine, RequestGate, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::new(tmp.path().join("session.json")));
        let (_tx, rx) = event_channel();
        let (mut machine, handle) = ConnectionStateMachine::new(
            store,
            Arc::new(PairingBroker::new(64)),
            PairingOutput::default(),
            rx,
        );
        for event in event_for(state) {
            machine.apply(event).await;
        }
        assert_eq!(machine.state(), state);
        (machine, RequestGate::new(handle), tmp)
    }

    #[tokio::test]
    async fn test_admit_iff_connected() {
        for state in ConnectionState::ALL {
            let (_machine, gate, _tmp) = machine_in(state).await;
            let admission = gate.admit();
            assert_eq!(admission.is_proceed(), state == ConnectionState::Connected);
            if let Admission::Reject(r) = admission {
                assert_eq!(r.state, state);
                assert!(r.to_string().contains(state.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn test_live_check_requires_capability_agreement() {
        let (_machine, gate, _tmp) = machine_in(ConnectionState::Connected).await;
        let capability = LoopbackCapability::new();
        let (tx, _rx) = event_channel();
        capability.initialize(None, tx).await.unwrap();

        // No info yet.
        let admission = gate.admit_live(&capability).await;
        assert!(!admission.is_proceed());

        capability
            .emit(LifecycleEvent::Ready(SessionCredential::new(b"C1".to_vec())))
            .unwrap();
        assert!(gate.admit_live(&capability).await.is_proceed());

        capability.set_remote_state(RemoteState::Timeout);
        match gate.admit_live(&capability).await {
            Admission::Reject(r) => {
                assert_eq!(r.state, ConnectionState::Connected);
                assert!(r.detail.unwrap().contains("TIMEOUT"));
            }
            Admission::Proceed => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn test_live_check_failure_is_rejection() {
        let (_machine, gate, _tmp) = machine_in(ConnectionState::Connected).await;
        let capability = LoopbackCapability::new();
        let (tx, _rx) = event_channel();
        capability.initialize(None, tx).await.unwrap();
        capability
            .emit(LifecycleEvent::Ready(SessionCredential::new(b"C1".to_vec())))
            .unwrap();

        capability.fail_next(CapabilityError::Timeout(5));
        let admission = gate.admit_live(&capability).await;
        assert!(matches!(admission, Admission::Reject(Rejection { detail: Some(_), .. })));
    }

    #[tokio::test]
    async fn test_live_check_skips_capability_when_not_connected() {
        let (_machine, gate, _tmp) = machine_in(ConnectionState::AuthenticatedNotReady).await;
        let capability = LoopbackCapability::new();
        capability.fail_next(CapabilityError::Timeout(5));

        let admission = gate.admit_live(&capability).await;
        assert_eq!(
            admission,
            Admission::Reject(Rejection {
                state: ConnectionState::AuthenticatedNotReady,
                detail: None,
            })
        );
        // The queued failure was never consumed.
        assert!(capability.get_state().await.is_err());
    }
}
