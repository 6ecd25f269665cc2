//! In-process messaging capability.
//!
//! `LoopbackCapability` never talks to a remote service. Events are
//! scripted with [`LoopbackCapability::emit`] and sent messages are kept in
//! memory, which makes it the capability of choice for local runs and
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use pairlink_core::{Destination, LifecycleEvent, PairingToken, SessionCredential};

use crate::error::CapabilityError;
use crate::events::EventSender;
use crate::traits::{AccountInfo, MessagePayload, MessageReceipt, MessagingCapability, RemoteState};

/// A message accepted by the loopback capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: Destination,
    pub payload: MessagePayload,
}

#[derive(Debug)]
struct Inner {
    events: Option<EventSender>,
    remote: RemoteState,
    info: Option<AccountInfo>,
    restored: Option<SessionCredential>,
    sent: Vec<SentMessage>,
    fail_next: Option<CapabilityError>,
    fail_send: Option<CapabilityError>,
    logouts: u32,
}

/// Scripted, in-memory capability.
#[derive(Debug)]
pub struct LoopbackCapability {
    inner: Mutex<Inner>,
    token_counter: AtomicU64,
    auto_pair: bool,
}

impl LoopbackCapability {
    /// Create a passive capability: it only emits what it is told to.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: None,
                remote: RemoteState::Opening,
                info: None,
                restored: None,
                sent: Vec::new(),
                fail_next: None,
                fail_send: None,
                logouts: 0,
            }),
            token_counter: AtomicU64::new(1),
            auto_pair: false,
        }
    }

    /// Create a capability that behaves like a freshly started client:
    /// on `initialize` it restores the given credential (authenticated,
    /// then ready) or issues a pairing token, and after `logout` it
    /// issues a new token.
    pub fn auto_pairing() -> Self {
        Self {
            auto_pair: true,
            ..Self::new()
        }
    }

    /// Emit a lifecycle event as if the remote side reported it.
    ///
    /// The capability's own view (`get_state`, `info`) follows the event.
    pub fn emit(&self, event: LifecycleEvent) -> Result<(), CapabilityError> {
        let sender = {
            let mut inner = self.inner.lock();
            let sender = inner.events.clone().ok_or(CapabilityError::NotInitialized)?;
            match &event {
                LifecycleEvent::PairingTokenIssued(_) => {
                    inner.remote = RemoteState::Pairing;
                    inner.info = None;
                }
                LifecycleEvent::Authenticated(_) => inner.remote = RemoteState::Opening,
                LifecycleEvent::Ready(_) => {
                    inner.remote = RemoteState::Connected;
                    inner.info = Some(AccountInfo {
                        id: "loopback@c.us".to_string(),
                        display_name: Some("Loopback".to_string()),
                        platform: Some("loopback".to_string()),
                    });
                }
                LifecycleEvent::Disconnected { .. } | LifecycleEvent::AuthFailed { .. } => {
                    inner.remote = RemoteState::Unpaired;
                    inner.info = None;
                }
            }
            sender
        };

        debug!(event = event.name(), "Loopback emitting lifecycle event");
        if sender.emit(event) {
            Ok(())
        } else {
            Err(CapabilityError::Closed)
        }
    }

    /// Issue a fresh pairing token with a generated value.
    pub fn issue_token(&self) -> Result<PairingToken, CapabilityError> {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let token = PairingToken::new(format!("loopback-pairing-{}", n));
        self.emit(LifecycleEvent::PairingTokenIssued(token.clone()))?;
        Ok(token)
    }

    /// Override the state reported by `get_state` without emitting anything.
    pub fn set_remote_state(&self, state: RemoteState) {
        self.inner.lock().remote = state;
    }

    /// Make the next capability call fail with `error`.
    pub fn fail_next(&self, error: CapabilityError) {
        self.inner.lock().fail_next = Some(error);
    }

    /// Make the next `send_message` fail with `error`, after any state
    /// checks have passed.
    pub fn fail_next_send(&self, error: CapabilityError) {
        self.inner.lock().fail_send = Some(error);
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.lock().sent.clone()
    }

    /// Credential passed to `initialize`, if any.
    pub fn restored(&self) -> Option<SessionCredential> {
        self.inner.lock().restored.clone()
    }

    /// Number of `logout` calls received.
    pub fn logouts(&self) -> u32 {
        self.inner.lock().logouts
    }

    fn take_failure(&self) -> Result<(), CapabilityError> {
        match self.inner.lock().fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for LoopbackCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingCapability for LoopbackCapability {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn initialize(
        &self,
        restore: Option<SessionCredential>,
        events: EventSender,
    ) -> Result<(), CapabilityError> {
        self.take_failure()?;
        {
            let mut inner = self.inner.lock();
            inner.events = Some(events);
            inner.restored = restore.clone();
        }
        info!(restoring = restore.is_some(), "Loopback capability initialized");

        if self.auto_pair {
            match restore {
                Some(credential) => {
                    self.emit(LifecycleEvent::Authenticated(credential.clone()))?;
                    self.emit(LifecycleEvent::Ready(credential))?;
                }
                None => {
                    self.issue_token()?;
                }
            }
        }
        Ok(())
    }

    async fn get_state(&self) -> Result<RemoteState, CapabilityError> {
        self.take_failure()?;
        Ok(self.inner.lock().remote.clone())
    }

    async fn send_message(
        &self,
        to: &Destination,
        payload: MessagePayload,
    ) -> Result<MessageReceipt, CapabilityError> {
        self.take_failure()?;
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_send.take() {
            return Err(err);
        }
        if !inner.remote.is_connected() {
            return Err(CapabilityError::remote(
                409,
                format!("not connected ({})", inner.remote),
            ));
        }
        inner.sent.push(SentMessage {
            to: to.clone(),
            payload,
        });
        Ok(MessageReceipt {
            id: Some(format!("loopback-{}", inner.sent.len())),
        })
    }

    async fn logout(&self) -> Result<(), CapabilityError> {
        self.take_failure()?;
        self.inner.lock().logouts += 1;
        self.emit(LifecycleEvent::disconnected("LOGOUT"))?;
        if self.auto_pair {
            self.issue_token()?;
        }
        Ok(())
    }

    fn info(&self) -> Option<AccountInfo> {
        self.inner.lock().info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn cred(s: &str) -> SessionCredential {
        SessionCredential::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_emit_requires_initialize() {
        let cap = LoopbackCapability::new();
        let result = cap.emit(LifecycleEvent::disconnected("x"));
        assert!(matches!(result, Err(CapabilityError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_auto_pairing_without_restore_issues_token() {
        let cap = LoopbackCapability::auto_pairing();
        let (tx, mut rx) = event_channel();
        cap.initialize(None, tx).await.unwrap();

        match rx.recv().await.unwrap() {
            LifecycleEvent::PairingTokenIssued(token) => {
                assert!(token.as_str().starts_with("loopback-pairing-"))
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(cap.get_state().await.unwrap(), RemoteState::Pairing);
    }

    #[tokio::test]
    async fn test_auto_pairing_with_restore_becomes_ready() {
        let cap = LoopbackCapability::auto_pairing();
        let (tx, mut rx) = event_channel();
        cap.initialize(Some(cred("C1")), tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Authenticated(cred("C1")));
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Ready(cred("C1")));
        assert_eq!(cap.restored(), Some(cred("C1")));
        assert!(cap.info().is_some());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let cap = LoopbackCapability::new();
        let (tx, _rx) = event_channel();
        cap.initialize(None, tx).await.unwrap();
        let to = Destination::parse("123", "@c.us").unwrap();

        let result = cap.send_message(&to, MessagePayload::Text("hi".into())).await;
        assert!(matches!(result, Err(CapabilityError::Remote { .. })));

        cap.emit(LifecycleEvent::Ready(cred("C1"))).unwrap();
        let receipt = cap
            .send_message(&to, MessagePayload::Text("hi".into()))
            .await
            .unwrap();
        assert_eq!(receipt.id.as_deref(), Some("loopback-1"));
        assert_eq!(cap.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let cap = LoopbackCapability::new();
        cap.fail_next(CapabilityError::Timeout(5));
        assert!(cap.get_state().await.is_err());
        assert!(cap.get_state().await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_next_send_leaves_state_checks_alone() {
        let cap = LoopbackCapability::new();
        let (tx, _rx) = event_channel();
        cap.initialize(None, tx).await.unwrap();
        cap.emit(LifecycleEvent::Ready(cred("C1"))).unwrap();
        cap.fail_next_send(CapabilityError::remote(500, "boom"));

        assert!(cap.get_state().await.unwrap().is_connected());
        let to = Destination::parse("1", "@c.us").unwrap();
        assert!(cap.send_message(&to, MessagePayload::Text("a".into())).await.is_err());
        assert!(cap.send_message(&to, MessagePayload::Text("a".into())).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_emits_disconnect_then_token() {
        let cap = LoopbackCapability::auto_pairing();
        let (tx, mut rx) = event_channel();
        cap.initialize(Some(cred("C1")), tx).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        cap.logout().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "disconnected");
        assert_eq!(rx.recv().await.unwrap().name(), "pairing-token-issued");
        assert_eq!(cap.logouts(), 1);
        assert!(cap.info().is_none());
    }
}
