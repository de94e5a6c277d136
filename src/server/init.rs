//! Server initialization and run loop

use super::config::AppConfig;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use shellgate_core::{CloseReason, Gateway};
use shellgate_ssh::{SshConnector, SshOptions};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Run the server until Ctrl+C or SIGTERM
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Shellgate v{}", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let connector = Arc::new(SshConnector::new(SshOptions::default()));
    let gateway = Gateway::new(config.gateway.clone(), connector);
    info!(
        probe_timeout_secs = config.gateway.probe_timeout_secs,
        auth_timeout_secs = config.gateway.auth_timeout_secs,
        local_execution = config.gateway.execution.local_enabled,
        default_target = config.gateway.default_target.is_some(),
        "Gateway initialized"
    );

    let app = build_router(gateway.clone());

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on {} (WebSocket at /ws/terminal)", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("HTTP server error")?;

    let closed = gateway.registry().shutdown_all(CloseReason::Shutdown).await;
    info!(sessions_closed = closed, "Shellgate stopped");
    Ok(())
}

/// HTTP routes plus shared state
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .merge(crate::api::health_routes())
        .merge(crate::websocket::websocket_router())
        .layer(Extension(gateway))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
