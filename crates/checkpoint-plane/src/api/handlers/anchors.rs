//! Trust Anchor Handlers
//!
//! Publishes every trust anchor ever added. Shared HMAC secrets never leave
//! the plane; they are listed by fingerprint only.

use axum::{extract::State, Json};
use checkpoint_core::{ManifestAnchor, RevocationRecord, TrustAnchorManifest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use crate::api::error::ApiError;

/// Response listing trust anchors
#[derive(Debug, Serialize, Deserialize)]
pub struct ListAnchorsResponse {
    pub anchors: Vec<ManifestAnchor>,
    pub count: usize,
}

/// Response listing revocations
#[derive(Debug, Serialize, Deserialize)]
pub struct ListRevocationsResponse {
    pub revocations: Vec<RevocationRecord>,
    pub count: usize,
}

/// List trust anchors
///
/// GET /v1/trust-anchors
pub async fn list_trust_anchors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListAnchorsResponse>, ApiError> {
    let anchors = state.service.list_trust_anchors().await?;
    Ok(Json(ListAnchorsResponse {
        count: anchors.len(),
        anchors,
    }))
}

/// Signed trust anchor manifest
///
/// GET /v1/trust-anchors/manifest
pub async fn get_manifest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TrustAnchorManifest>, ApiError> {
    Ok(Json(state.service.trust_anchor_manifest().await?))
}

/// Revocation audit trail
///
/// GET /v1/trust-anchors/revocations
pub async fn list_revocations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListRevocationsResponse>, ApiError> {
    let revocations = state
        .service
        .keys()
        .anchors()
        .list_revocations()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ListRevocationsResponse {
        count: revocations.len(),
        revocations,
    }))
}
