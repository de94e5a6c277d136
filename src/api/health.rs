//! Health check endpoint
//!
//! `/health` reports liveness, version and the number of live sessions.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use shellgate_core::Gateway;
use std::sync::Arc;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
}

async fn health_check(Extension(gateway): Extension<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: gateway.registry().len().await,
    })
}

/// Health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}
