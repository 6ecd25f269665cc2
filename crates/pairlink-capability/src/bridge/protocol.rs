//! Bridge wire protocol.
//!
//! Newline-delimited JSON-RPC 2.0. Pairlink sends requests; the helper
//! answers them and additionally sends notifications for lifecycle events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pairlink_core::{LifecycleEvent, PairingToken, SessionCredential};

use crate::traits::{AccountInfo, MessagePayload};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request methods understood by the helper.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const GET_STATE: &str = "getState";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const LOGOUT: &str = "logout";
    pub const SHUTDOWN: &str = "shutdown";
}

/// Notification methods sent by the helper.
pub mod notifications {
    pub const QR: &str = "qr";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const READY: &str = "ready";
    pub const DISCONNECTED: &str = "disconnected";
    pub const AUTH_FAILURE: &str = "auth_failure";
}

/// JSON-RPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest<P> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcRequest<P> {
    pub fn new(id: u64, method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification: a request that expects no reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification<P> {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcNotification<P> {
    pub fn new(method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any line the helper may write.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// A classified incoming line.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Lifecycle notification
    Notification { method: String, params: Value },
}

impl Incoming {
    /// Parse one line from the helper.
    pub fn parse(line: &str) -> Result<Self, String> {
        let raw: RawMessage =
            serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;

        match (raw.id, raw.method) {
            (Some(id), None) => {
                let outcome = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Incoming::Response { id, outcome })
            }
            (None, Some(method)) => Ok(Incoming::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(_), Some(method)) => Err(format!("helper sent a request ('{}'), not supported", method)),
            (None, None) => Err("message has neither id nor method".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Base64 credential from the last run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStateResult {
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaParams {
    pub mime_type: String,
    /// Base64 file content
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageParams {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl SendMessageParams {
    pub fn new(to: &str, payload: MessagePayload) -> Self {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        match payload {
            MessagePayload::Text(text) => Self {
                to: to.to_string(),
                text: Some(text),
                media: None,
                caption: None,
            },
            MessagePayload::Media {
                attachment,
                caption,
            } => Self {
                to: to.to_string(),
                text: None,
                media: Some(MediaParams {
                    mime_type: attachment.mime_type,
                    data: STANDARD.encode(&attachment.data),
                    filename: attachment.filename,
                }),
                caption,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct QrParams {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionParams {
    session: String,
    #[serde(default)]
    info: Option<AccountInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReasonParams {
    #[serde(default)]
    reason: Option<String>,
}

/// A lifecycle notification turned into an event, plus any account info
/// that came along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedNotification {
    pub event: LifecycleEvent,
    pub info: Option<AccountInfo>,
}

/// Translate a helper notification into a lifecycle event.
pub fn decode_notification(method: &str, params: Value) -> Result<DecodedNotification, String> {
    fn credential(params: Value) -> Result<(SessionCredential, Option<AccountInfo>), String> {
        let p: SessionParams =
            serde_json::from_value(params).map_err(|e| format!("bad session params: {}", e))?;
        let credential = SessionCredential::from_base64(&p.session)
            .map_err(|e| format!("session is not base64: {}", e))?;
        if credential.is_empty() {
            return Err("session is empty".to_string());
        }
        Ok((credential, p.info))
    }

    fn reason(params: Value) -> String {
        serde_json::from_value::<ReasonParams>(params)
            .ok()
            .and_then(|p| p.reason)
            .unwrap_or_else(|| "unknown".to_string())
    }

    let decoded = match method {
        notifications::QR => {
            let p: QrParams =
                serde_json::from_value(params).map_err(|e| format!("bad qr params: {}", e))?;
            DecodedNotification {
                event: LifecycleEvent::PairingTokenIssued(PairingToken::new(p.token)),
                info: None,
            }
        }
        notifications::AUTHENTICATED => {
            let (credential, info) = credential(params)?;
            DecodedNotification {
                event: LifecycleEvent::Authenticated(credential),
                info,
            }
        }
        notifications::READY => {
            let (credential, info) = credential(params)?;
            DecodedNotification {
                event: LifecycleEvent::Ready(credential),
                info,
            }
        }
        notifications::DISCONNECTED => DecodedNotification {
            event: LifecycleEvent::disconnected(reason(params)),
            info: None,
        },
        notifications::AUTH_FAILURE => DecodedNotification {
            event: LifecycleEvent::auth_failed(reason(params)),
            info: None,
        },
        other => return Err(format!("unknown notification '{}'", other)),
    };
    Ok(decoded)
}
