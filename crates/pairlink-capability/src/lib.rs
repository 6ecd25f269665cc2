//! # pairlink-capability
//!
//! The messaging capability is the component that actually talks to the
//! remote messaging service: it pairs the account, keeps the connection
//! alive and delivers messages. Pairlink treats it as an opaque
//! collaborator behind the [`MessagingCapability`] trait.
//!
//! This crate provides:
//! - The [`MessagingCapability`] trait and its payload types
//! - The lifecycle event channel the capability reports through
//! - [`LoopbackCapability`], an in-process implementation for local runs and tests
//! - [`BridgeCapability`], which drives a helper process over JSON-RPC on stdio

pub mod bridge;
pub mod error;
pub mod events;
pub mod loopback;
pub mod traits;

pub use bridge::BridgeCapability;
pub use error::{CapabilityError, TransportError};
pub use events::{event_channel, EventReceiver, EventSender};
pub use loopback::LoopbackCapability;
pub use traits::{
    AccountInfo, MediaAttachment, MessagePayload, MessageReceipt, MessagingCapability, RemoteState,
};
