//! Signing Key Handlers
//!
//! Lifecycle operations on offline-generated keys: registration by key
//! reference, activation (rotation) and compromise reports. Secret material
//! never passes through this API; the plane reads it from its key stores.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use checkpoint_core::{Algorithm, KeyStatus, OverlapEnd, OverlapWindow, SigningKey, SigningMaterial};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::AppState;
use crate::api::error::ApiError;

/// Public view of a signing key
///
/// Omits the verification material, which for HMAC keys is the secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeySummary {
    pub key_id: String,
    pub algorithm: Algorithm,
    pub status: KeyStatus,
    pub valid_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_until: Option<OverlapEnd>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl From<SigningKey> for KeySummary {
    fn from(key: SigningKey) -> Self {
        Self {
            key_id: key.key_id,
            algorithm: key.algorithm,
            status: key.status,
            valid_from: key.valid_from,
            valid_until: key.valid_until,
            superseded_by: key.superseded_by,
            overlap_until: key.overlap_until,
            activated_at: key.activated_at,
        }
    }
}

/// Response listing signing keys
#[derive(Debug, Serialize, Deserialize)]
pub struct ListKeysResponse {
    pub keys: Vec<KeySummary>,
    pub primary_key_id: Option<String>,
}

/// Request to register an offline-generated key
///
/// `key_ref` names where the plane finds the signing material, e.g.
/// `file:k7.key` or `hsm:slot-4`. Asymmetric keys carry their base64 public
/// key. HMAC keys carry none; the anchor is taken from the stored secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterKeyRequest {
    pub key_id: String,
    pub algorithm: Algorithm,
    pub key_ref: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

/// Request to activate a pending key
///
/// At most one overlap form may be given; neither means the outgoing key
/// stops signing at the next checkpoint.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ActivateKeyRequest {
    /// Outgoing key co-signs this many more checkpoints
    #[serde(default)]
    pub overlap_checkpoints: Option<u64>,
    /// Outgoing key co-signs for this many seconds
    #[serde(default)]
    pub overlap_secs: Option<i64>,
}

impl ActivateKeyRequest {
    fn overlap(&self) -> Result<OverlapWindow, ApiError> {
        match (self.overlap_checkpoints, self.overlap_secs) {
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "specify overlap_checkpoints or overlap_secs, not both".into(),
            )),
            (Some(n), None) => Ok(OverlapWindow::Checkpoints(n)),
            (None, Some(secs)) if secs < 0 => Err(ApiError::BadRequest("overlap_secs must not be negative".into())),
            (None, Some(secs)) => chrono::Duration::try_seconds(secs)
                .map(OverlapWindow::Duration)
                .ok_or_else(|| ApiError::BadRequest(format!("overlap_secs out of range: {}", secs))),
            (None, None) => Ok(OverlapWindow::Immediate),
        }
    }
}

/// Response from key activation
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateKeyResponse {
    pub key_id: String,
    pub previous: Option<String>,
    pub overlap_until: Option<OverlapEnd>,
    pub safe_mode: bool,
}

/// Compromise report
#[derive(Debug, Serialize, Deserialize)]
pub struct CompromiseRequest {
    pub reason: String,
    pub reported_by: String,
}

/// Response to a compromise report
#[derive(Debug, Serialize, Deserialize)]
pub struct CompromiseResponse {
    pub key_id: String,
    pub revoked_at: DateTime<Utc>,
    pub safe_mode: bool,
    pub fallback_key_id: Option<String>,
}

/// List signing keys
///
/// GET /v1/keys
pub async fn list_keys(State(state): State<Arc<AppState>>) -> Result<Json<ListKeysResponse>, ApiError> {
    let keys = state.service.keys();
    Ok(Json(ListKeysResponse {
        keys: keys.list_keys()?.into_iter().map(KeySummary::from).collect(),
        primary_key_id: keys.primary_key_id()?,
    }))
}

/// Register a key as pending
///
/// POST /v1/keys
pub async fn register_key(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterKeyRequest>,
) -> Result<(StatusCode, Json<KeySummary>), ApiError> {
    if request.key_id.trim().is_empty() {
        return Err(ApiError::BadRequest("key_id cannot be empty".into()));
    }
    let keys = state.service.keys();

    let public_key = match (request.algorithm.is_symmetric(), &request.public_key) {
        (true, Some(_)) => {
            return Err(ApiError::BadRequest(
                "HMAC keys are registered without key material".into(),
            ))
        }
        (true, None) => match keys
            .vault()
            .retrieve_signing_material(&request.key_ref)
            .await
            .map_err(|e| ApiError::BadRequest(format!("key_ref: {}", e)))?
        {
            SigningMaterial::Secret(secret) => secret.expose().to_vec(),
            SigningMaterial::Remote(_) => {
                return Err(ApiError::BadRequest(format!(
                    "HMAC secret behind '{}' is not readable; its trust anchor cannot be built",
                    request.key_ref
                )))
            }
        },
        (false, Some(encoded)) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| ApiError::BadRequest(format!("public_key: {}", e)))?,
        (false, None) => return Err(ApiError::BadRequest("public_key is required".into())),
    };

    let now = Utc::now();
    let valid_from = request.valid_from.unwrap_or(now);
    if request.valid_until.is_some_and(|until| until <= valid_from) {
        return Err(ApiError::BadRequest("valid_until must be after valid_from".into()));
    }

    let mut key = SigningKey::pending(
        request.key_id,
        request.algorithm,
        request.key_ref,
        public_key,
        valid_from,
    );
    key.valid_until = request.valid_until;

    keys.register_key(key.clone()).await?;
    info!(key_id = %key.key_id, algorithm = %key.algorithm, key_ref = %key.key_ref, "Key registered via API");
    Ok((StatusCode::CREATED, Json(KeySummary::from(key))))
}

/// Activate a pending key
///
/// POST /v1/keys/{key_id}/activate
///
/// In safe mode a key of the fallback algorithm is activated as the
/// fallback signer; any other key restores normal operation.
pub async fn activate_key(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
    Json(request): Json<ActivateKeyRequest>,
) -> Result<Json<ActivateKeyResponse>, ApiError> {
    let overlap = request.overlap()?;
    let keys = state.service.keys();
    let revocation = state.service.revocation();

    let outcome = if revocation.is_safe_mode() {
        let key = keys
            .get_key(&key_id)?
            .ok_or_else(|| ApiError::NotFound(format!("key '{}'", key_id)))?;
        if key.algorithm == revocation.fallback_algorithm() {
            revocation.activate_fallback(&key_id).await?
        } else {
            revocation.restore(&key_id, overlap).await?
        }
    } else {
        keys.activate_key(&key_id, overlap).await?
    };

    info!(key_id = %outcome.key_id, previous = ?outcome.previous, "Key activated via API");
    Ok(Json(ActivateKeyResponse {
        key_id: outcome.key_id,
        previous: outcome.previous,
        overlap_until: outcome.overlap_until,
        safe_mode: revocation.is_safe_mode(),
    }))
}

/// Report a key compromise
///
/// POST /v1/keys/{key_id}/compromise
pub async fn report_compromise(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
    Json(request): Json<CompromiseRequest>,
) -> Result<Json<CompromiseResponse>, ApiError> {
    if request.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason cannot be empty".into()));
    }
    if request.reported_by.trim().is_empty() {
        return Err(ApiError::BadRequest("reported_by cannot be empty".into()));
    }

    let outcome = state
        .service
        .revocation()
        .handle_compromise(&key_id, &request.reason, &request.reported_by)
        .await?;

    Ok(Json(CompromiseResponse {
        key_id,
        revoked_at: outcome.revocation.record.revoked_at,
        safe_mode: outcome.safe_mode,
        fallback_key_id: outcome.fallback_key_id,
    }))
}
