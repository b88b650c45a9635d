//! Checkpoint Handlers
//!
//! Creation, retrieval and ad-hoc verification of checkpoints. Stored
//! checkpoints are re-verified against the trust anchors before they are
//! served, so a corrupted archive is reported instead of handed out.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use checkpoint_core::{Checkpoint, CheckpointError, RegistrySnapshot, VerificationReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::api::error::ApiError;
use crate::storage::{CheckpointSelector, StoredCheckpoint};

/// Response listing stored versions
#[derive(Debug, Serialize, Deserialize)]
pub struct ListCheckpointsResponse {
    pub versions: Vec<u64>,
    pub latest: Option<u64>,
    pub count: usize,
}

/// Request to verify a checkpoint against this plane's trust anchors
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyCheckpointRequest {
    pub checkpoint: Checkpoint,
    pub snapshot: RegistrySnapshot,
    /// Skip the freshness check and accept inactive anchors
    #[serde(default)]
    pub historical: bool,
}

/// Build, sign and persist the next checkpoint
///
/// POST /v1/checkpoints
pub async fn create_checkpoint(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<StoredCheckpoint>), ApiError> {
    match state.service.create_checkpoint().await {
        Ok(stored) => {
            info!(version = stored.version(), "Checkpoint created via API");
            Ok((StatusCode::CREATED, Json(stored)))
        }
        Err(CheckpointError::SigningError(msg)) if state.service.revocation().is_safe_mode() => {
            Err(ApiError::SafeModeUnavailable(msg))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch a checkpoint by version or `latest`
///
/// GET /v1/checkpoints/{selector}
pub async fn get_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(selector): Path<String>,
) -> Result<Json<StoredCheckpoint>, ApiError> {
    let parsed: CheckpointSelector = selector.parse().map_err(ApiError::BadRequest)?;

    let stored = state
        .service
        .get_checkpoint(parsed)
        .await?
        .ok_or_else(|| ApiError::NoCheckpoint(format!("no checkpoint for '{}'", selector)))?;

    let report = state
        .verifier
        .verify_historical(&stored.checkpoint, &stored.snapshot)
        .await?;
    if !report.valid {
        warn!(version = stored.version(), "Refusing to serve checkpoint that fails verification");
        return Err(ApiError::VerificationFailed(report.reasons));
    }

    Ok(Json(stored))
}

/// List stored checkpoint versions
///
/// GET /v1/checkpoints
pub async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListCheckpointsResponse>, ApiError> {
    let versions = state.service.list_versions().await?;
    Ok(Json(ListCheckpointsResponse {
        latest: versions.last().copied(),
        count: versions.len(),
        versions,
    }))
}

/// Verify a checkpoint supplied by the caller
///
/// POST /v1/checkpoints/verify
///
/// Always answers 200 with the report; `valid` carries the verdict.
pub async fn verify_checkpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyCheckpointRequest>,
) -> Result<Json<VerificationReport>, ApiError> {
    let report = if request.historical {
        state
            .verifier
            .verify_historical(&request.checkpoint, &request.snapshot)
            .await?
    } else {
        state.verifier.verify(&request.checkpoint, &request.snapshot).await?
    };
    Ok(Json(report))
}
