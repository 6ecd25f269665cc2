//! The `serve` command: run the gateway until interrupted.

use std::sync::Arc;

use anyhow::Context;
use figment::providers::Serialized;
use figment::Figment;
use tokio::net::TcpListener;
use tracing::info;

use pairlink_capability::{BridgeCapability, LoopbackCapability, MessagingCapability};
use pairlink_core::error::format_error_with_suggestion;
use pairlink_core::Config;
use pairlink_server::{build_router, serve, AppState};
use pairlink_session::{FileSessionStore, PairingOutput, SessionRuntime};

use crate::ServeArgs;

impl ServeArgs {
    /// Layer the command-line overrides on top of `figment`.
    pub fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(host) = &self.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = self.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(capability) = &self.capability {
            figment = figment.merge(Serialized::default("messaging.capability", capability));
        }
        if let Some(path) = &self.session_file {
            figment = figment.merge(Serialized::default("session.path", path));
        }
        figment
    }
}

fn report(e: pairlink_core::Error) -> anyhow::Error {
    anyhow::anyhow!(format_error_with_suggestion(&e))
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config::from_figment(args.apply(Config::figment())).map_err(report)?;

    let capability: Arc<dyn MessagingCapability> = match config.messaging.capability.as_str() {
        "loopback" => Arc::new(LoopbackCapability::auto_pairing()),
        _ => {
            let bridge = BridgeCapability::spawn(&config.messaging.bridge)
                .await
                .map_err(|e| report(e.into()))?;
            Arc::new(bridge)
        }
    };

    info!(path = %config.session.path.display(), "Using session record");
    let store = Arc::new(FileSessionStore::new(&config.session.path));
    let runtime = SessionRuntime::start(
        store,
        capability,
        PairingOutput::from_config(&config.pairing),
        config.pairing.image_size,
    )
    .await
    .map_err(report)?;

    let state = AppState::from_runtime(&runtime, &config.messaging.address_suffix);
    let router = build_router(state, config.server.legacy_routes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, router, shutdown_signal()).await?;

    info!("Server stopped");
    runtime.shutdown().await.map_err(report)?;
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
