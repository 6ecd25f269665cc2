//! # pairlink-core
//!
//! Core types and abstractions for Pairlink, an HTTP gateway in front of a
//! QR-paired messaging account.
//!
//! This crate provides:
//! - Connection states and lifecycle events reported by the messaging capability
//! - Opaque session credentials and pairing tokens
//! - Message destinations
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{ConnectionState, Destination, LifecycleEvent, PairingToken, SessionCredential};
