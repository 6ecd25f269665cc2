//! # pairlink-server
//!
//! HTTP surface of Pairlink: status and pairing-code pages, message
//! sending, and pairing regeneration, built on axum.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pairlink_server::{build_router, serve, AppState};
//!
//! let state = AppState::from_runtime(&runtime, &config.messaging.address_suffix);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! serve(listener, build_router(state, true), shutdown_signal()).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod page;

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use pairlink_capability::MessagingCapability;
use pairlink_session::{PairingBroker, RequestGate, SessionRuntime, StateHandle};

pub use error::ApiError;

/// Largest accepted upload for media messages.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub handle: StateHandle,
    pub gate: RequestGate,
    pub broker: Arc<PairingBroker>,
    pub capability: Arc<dyn MessagingCapability>,
    pub address_suffix: Arc<str>,
}

impl AppState {
    pub fn from_runtime(runtime: &SessionRuntime, address_suffix: &str) -> Self {
        Self {
            handle: runtime.handle().clone(),
            gate: runtime.gate(),
            broker: runtime.broker().clone(),
            capability: runtime.capability().clone(),
            address_suffix: Arc::from(address_suffix),
        }
    }
}

/// Build the router. `legacy_routes` adds the historical route names.
pub fn build_router(state: AppState, legacy_routes: bool) -> Router {
    let mut router = Router::new()
        .route("/status", get(handlers::status))
        .route("/pairing-image", get(handlers::pairing_image))
        .route(
            "/send-text",
            get(handlers::send_text_query).post(handlers::send_text_body),
        )
        .route("/send-media", post(handlers::send_media))
        .route("/regenerate-pairing", get(handlers::regenerate_pairing))
        .route("/health", get(handlers::health));

    if legacy_routes {
        router = router
            .route("/qr-status", get(handlers::status))
            .route("/qr-image", get(handlers::pairing_image))
            .route(
                "/send-message",
                get(handlers::send_text_query).post(handlers::send_text_body),
            )
            .route("/enviar", post(handlers::send_combined))
            .route("/generate-qr", get(handlers::regenerate_pairing))
            .route("/keep-alive", get(handlers::health));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Pairlink listening on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
