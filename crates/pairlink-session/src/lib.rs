//! # pairlink-session
//!
//! Session lifecycle for Pairlink: what state the gateway believes the
//! account is in, what it persists so that belief survives a restart, and
//! which requests it lets through to the messaging capability.
//!
//! This crate provides:
//! - [`store::FileSessionStore`] - atomic, single-record credential persistence
//! - [`pairing::PairingBroker`] - the latest pairing token and its renderings
//! - [`machine::ConnectionStateMachine`] - the only writer of connection state
//! - [`gate::RequestGate`] - admission check for state-dependent operations
//! - [`runtime::SessionRuntime`] - wiring of the above around a capability
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pairlink_capability::LoopbackCapability;
//! use pairlink_session::{FileSessionStore, PairingOutput, SessionRuntime};
//!
//! let store = Arc::new(FileSessionStore::new("session.json"));
//! let capability = Arc::new(LoopbackCapability::auto_pairing());
//! let runtime = SessionRuntime::start(store, capability, PairingOutput::default(), 256).await?;
//!
//! let gate = runtime.gate();
//! if gate.admit().is_proceed() {
//!     // safe to call the capability
//! }
//! ```

pub mod gate;
pub mod machine;
pub mod pairing;
pub mod runtime;
pub mod store;

pub use gate::{Admission, Rejection, RequestGate};
pub use machine::{
    load_restore_hint, transition, ConnectionStateMachine, PairingOutput, StateHandle,
};
pub use pairing::{render_artifact, Artifact, ArtifactFormat, PairingBroker, RenderError};
pub use runtime::SessionRuntime;
pub use store::{write_atomic, FileSessionStore, PersistedSession, SessionStore, StoreError};
