//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use checkpoint_core::{CheckpointError, VerificationFailure};
use serde::Serialize;
use thiserror::Error;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No checkpoint: {0}")]
    NoCheckpoint(String),

    #[error("Checkpoint failed verification")]
    VerificationFailed(Vec<VerificationFailure>),

    #[error("Safe mode: {0}")]
    SafeModeUnavailable(String),

    #[error("Rotation conflict: {0}")]
    RotationConflict(String),

    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Invalid key state: {0}")]
    InvalidKeyState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiError::NoCheckpoint(msg) => (StatusCode::NOT_FOUND, "NO_CHECKPOINT", msg.clone(), None),
            ApiError::VerificationFailed(reasons) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VERIFICATION_FAILED",
                "Stored checkpoint does not verify against the trust anchors".to_string(),
                Some(serde_json::json!({ "reasons": reasons })),
            ),
            ApiError::SafeModeUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SAFE_MODE_UNAVAILABLE",
                msg.clone(),
                None,
            ),
            ApiError::RotationConflict(msg) => (StatusCode::CONFLICT, "ROTATION_CONFLICT", msg.clone(), None),
            ApiError::SigningUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SIGNING_UNAVAILABLE",
                msg.clone(),
                None,
            ),
            ApiError::InvalidKeyState(msg) => (StatusCode::CONFLICT, "INVALID_KEY_STATE", msg.clone(), None),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<CheckpointError> for ApiError {
    fn from(err: CheckpointError) -> Self {
        let message = err.to_string();
        match err {
            CheckpointError::VerificationFailure(failure) => ApiError::VerificationFailed(vec![failure]),
            CheckpointError::SigningError(msg) => ApiError::SigningUnavailable(msg),
            CheckpointError::RotationConflict(msg) => ApiError::RotationConflict(msg),
            CheckpointError::RevocationEscalation { .. } => ApiError::SafeModeUnavailable(message),
            CheckpointError::InvalidTransition { .. } | CheckpointError::DuplicateKey(_) => {
                ApiError::InvalidKeyState(message)
            }
            CheckpointError::UnknownKey(key_id) => ApiError::NotFound(format!("key '{}'", key_id)),
            CheckpointError::ConfigError(msg) | CheckpointError::MissingField(msg) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(message),
        }
    }
}
