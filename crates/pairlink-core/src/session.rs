//! Connection state and lifecycle types.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// What the gateway believes about the account's connection.
///
/// Mutated only by the state machine in response to lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Process started, nothing heard from the capability yet
    Initializing,
    /// A pairing code is available and waiting to be scanned
    AwaitingPairing,
    /// Credentials accepted but the account is not usable yet
    AuthenticatedNotReady,
    /// Account is ready to send messages
    Connected,
    /// Connection was lost or the account logged out
    Disconnected,
    /// The remote side rejected the credentials
    AuthFailed,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [ConnectionState; 6] = [
        ConnectionState::Initializing,
        ConnectionState::AwaitingPairing,
        ConnectionState::AuthenticatedNotReady,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::AuthFailed,
    ];

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::AuthenticatedNotReady => "authenticated_not_ready",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
        }
    }

    /// Check if messages can be sent in this state.
    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque proof of a completed pairing.
///
/// The bytes are never interpreted; they are handed back to the capability
/// as a restoration hint on the next start.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(Vec<u8>);

impl SessionCredential {
    /// Wrap raw credential bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode a credential from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded.trim()).map(Self)
    }

    /// Encode the credential as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Credentials end up in logs through Debug; never print the content.
impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential({} bytes)", self.0.len())
    }
}

/// Short-lived pairing code issued by the capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingToken(String);

impl PairingToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification from the messaging capability about pairing or connection.
///
/// Events are strictly ordered as emitted, but unordered relative to API
/// requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A new pairing code superseding any previous one
    PairingTokenIssued(PairingToken),
    /// Pairing or restoration succeeded
    Authenticated(SessionCredential),
    /// The account is ready for use
    Ready(SessionCredential),
    /// The connection was lost
    Disconnected { reason: String },
    /// The remote side rejected the credentials
    AuthFailed { reason: String },
}

impl LifecycleEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingTokenIssued(_) => "pairing-token-issued",
            Self::Authenticated(_) => "authenticated",
            Self::Ready(_) => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::AuthFailed { .. } => "auth-failed",
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }
}

/// Address of a message recipient as understood by the capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Build a destination from user input.
    ///
    /// Bare numbers get `suffix` appended; values that already carry a
    /// domain (`...@...`) are used as-is. Returns `None` for blank input.
    pub fn parse(raw: &str, suffix: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.contains('@') {
            Some(Self(raw.to_string()))
        } else {
            Some(Self(format!("{}{}", raw, suffix)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(ConnectionState::AuthenticatedNotReady.to_string(), "authenticated_not_ready");
        let json = serde_json::to_string(&ConnectionState::AuthFailed).unwrap();
        assert_eq!(json, "\"auth_failed\"");
        for state in ConnectionState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_only_connected_is_connected() {
        let connected: Vec<_> = ConnectionState::ALL
            .iter()
            .filter(|s| s.is_connected())
            .collect();
        assert_eq!(connected, vec![&ConnectionState::Connected]);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = SessionCredential::new(b"secret-token".to_vec());
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("12 bytes"));
    }

    #[test]
    fn test_credential_base64() {
        let cred = SessionCredential::new(vec![0u8, 159, 146, 150]);
        let decoded = SessionCredential::from_base64(&cred.to_base64()).unwrap();
        assert_eq!(decoded, cred);
        assert!(SessionCredential::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!(Destination::parse(" 123 ", "@c.us").unwrap().as_str(), "123@c.us");
        assert_eq!(Destination::parse("123@g.us", "@c.us").unwrap().as_str(), "123@g.us");
        assert!(Destination::parse("   ", "@c.us").is_none());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(LifecycleEvent::auth_failed("banned").name(), "auth-failed");
        assert_eq!(LifecycleEvent::disconnected("net").name(), "disconnected");
    }
}
