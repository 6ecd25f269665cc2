//! Capability trait definitions.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pairlink_core::{Destination, SessionCredential};

use crate::error::CapabilityError;
use crate::events::EventSender;

/// Connection state as reported by the remote side.
///
/// Only `Connected` means messages can be delivered; the other values are
/// kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Connected,
    Opening,
    Pairing,
    Unpaired,
    Conflict,
    Timeout,
    Unknown(String),
}

impl RemoteState {
    /// Parse the remote's state name (case-insensitive).
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "CONNECTED" => Self::Connected,
            "OPENING" => Self::Opening,
            "PAIRING" => Self::Pairing,
            "UNPAIRED" | "UNPAIRED_IDLE" => Self::Unpaired,
            "CONFLICT" => Self::Conflict,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Unknown(name.to_string()),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Opening => write!(f, "OPENING"),
            Self::Pairing => write!(f, "PAIRING"),
            Self::Unpaired => write!(f, "UNPAIRED"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Identity of the paired account. Only available once ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// Account identifier on the remote service
    pub id: String,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Platform of the paired phone
    #[serde(default)]
    pub platform: Option<String>,
}

/// A file sent as a message.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    /// MIME type, e.g. `application/pdf`
    pub mime_type: String,
    /// Raw file content
    pub data: Vec<u8>,
    /// Original file name
    pub filename: Option<String>,
}

impl fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .field("filename", &self.filename)
            .finish()
    }
}

/// Content of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// Plain text
    Text(String),
    /// A file with an optional caption
    Media {
        attachment: MediaAttachment,
        caption: Option<String>,
    },
}

impl MessagePayload {
    /// Short description used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Media { .. } => "media",
        }
    }
}

/// Acknowledgement of a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    /// Message id assigned by the remote side, if it reports one
    #[serde(default)]
    pub id: Option<String>,
}

/// The messaging capability - pairs the account and delivers messages.
///
/// Every async method is a suspension point; callers must not assume the
/// gateway's state is unchanged when one returns.
#[async_trait]
pub trait MessagingCapability: Send + Sync {
    /// Capability identifier used in logs.
    fn name(&self) -> &str;

    /// Start the capability. `restore` is the last persisted credential,
    /// if any; lifecycle events are reported through `events`.
    async fn initialize(
        &self,
        restore: Option<SessionCredential>,
        events: EventSender,
    ) -> Result<(), CapabilityError>;

    /// Ask the remote side for its current connection state.
    async fn get_state(&self) -> Result<RemoteState, CapabilityError>;

    /// Deliver a message.
    async fn send_message(
        &self,
        to: &Destination,
        payload: MessagePayload,
    ) -> Result<MessageReceipt, CapabilityError>;

    /// Unlink the account. A fresh pairing code is expected to follow.
    async fn logout(&self) -> Result<(), CapabilityError>;

    /// Identity of the account; `None` until ready.
    fn info(&self) -> Option<AccountInfo>;

    /// Release resources held by the capability.
    async fn shutdown(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_state_parse() {
        assert_eq!(RemoteState::parse("CONNECTED"), RemoteState::Connected);
        assert_eq!(RemoteState::parse("connected"), RemoteState::Connected);
        assert_eq!(RemoteState::parse("UNPAIRED_IDLE"), RemoteState::Unpaired);
        assert_eq!(
            RemoteState::parse("TOS_BLOCK"),
            RemoteState::Unknown("TOS_BLOCK".to_string())
        );
        assert!(!RemoteState::parse("OPENING").is_connected());
    }

    #[test]
    fn test_account_info_wire_names() {
        let info: AccountInfo =
            serde_json::from_str(r#"{"id":"123@c.us","displayName":"Shop"}"#).unwrap();
        assert_eq!(info.display_name.as_deref(), Some("Shop"));
        assert!(info.platform.is_none());
    }

    #[test]
    fn test_attachment_debug_omits_data() {
        let attachment = MediaAttachment {
            mime_type: "application/pdf".to_string(),
            data: vec![1; 2048],
            filename: Some("invoice.pdf".to_string()),
        };
        let debug = format!("{:?}", attachment);
        assert!(debug.contains("2048"));
        assert!(!debug.contains("1, 1"));
    }
}
