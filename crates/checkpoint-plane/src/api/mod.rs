//! HTTP API for the checkpoint plane

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::keys::SafeModeStatus;
use handlers::AppState;

/// Health check response
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    /// A primary key is available to sign
    pub ready: bool,
    pub primary_key_id: Option<String>,
    pub latest_version: Option<u64>,
    pub safe_mode: SafeModeStatus,
    pub config_version: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let keys = state.service.keys();
    let primary_key_id = keys.primary_key_id().ok().flatten();
    let latest_version = state
        .service
        .list_versions()
        .await
        .ok()
        .and_then(|v| v.last().copied());
    let safe_mode = state
        .service
        .revocation()
        .status()
        .unwrap_or(SafeModeStatus::Normal);

    Json(ReadyResponse {
        ready: primary_key_id.is_some(),
        primary_key_id,
        latest_version,
        safe_mode,
        config_version: state.config.config_version.clone(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Checkpoint endpoints
        .route(
            "/v1/checkpoints",
            post(handlers::create_checkpoint).get(handlers::list_checkpoints),
        )
        .route("/v1/checkpoints/verify", post(handlers::verify_checkpoint))
        .route("/v1/checkpoints/{selector}", get(handlers::get_checkpoint))
        // Trust anchor endpoints
        .route("/v1/trust-anchors", get(handlers::list_trust_anchors))
        .route("/v1/trust-anchors/manifest", get(handlers::get_manifest))
        .route("/v1/trust-anchors/revocations", get(handlers::list_revocations))
        // Key lifecycle endpoints
        .route("/v1/keys", get(handlers::list_keys).post(handlers::register_key))
        .route("/v1/keys/{key_id}/activate", post(handlers::activate_key))
        .route("/v1/keys/{key_id}/compromise", post(handlers::report_compromise))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
