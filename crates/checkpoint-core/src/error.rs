//! Error types for checkpoint construction, signing and key lifecycle

use thiserror::Error;

use crate::key::KeyStatus;
use crate::verification::VerificationFailure;

/// Result type alias using CheckpointError
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while building, signing or verifying checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Snapshot could not be brought into canonical form
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Signing key or HSM unavailable, or signing exceeded its latency budget
    #[error("Signing error: {0}")]
    SigningError(String),

    /// Checkpoint was rejected by the verifier
    #[error("Checkpoint verification failed: {0}")]
    VerificationFailure(VerificationFailure),

    /// Another activation or checkpoint build is in flight
    #[error("Rotation conflict: {0}")]
    RotationConflict(String),

    /// The last active signing key was revoked
    #[error("Revocation escalation: last active key '{key_id}' was revoked")]
    RevocationEscalation { key_id: String },

    /// Key lifecycle transition not permitted by the state machine
    #[error("Invalid transition for key '{key_id}': {from} -> {to}")]
    InvalidTransition {
        key_id: String,
        from: KeyStatus,
        to: KeyStatus,
    },

    /// Key ID not known to the manager or trust anchor store
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// Key ID already registered
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Cryptographic primitive failure (bad key encoding, wrong length)
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Checkpoint or trust anchor persistence failed
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl CheckpointError {
    /// Whether an external scheduler may retry the failed operation with backoff.
    ///
    /// Verification failures are never retried; they are always surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckpointError::SerializationError(_)
                | CheckpointError::SigningError(_)
                | CheckpointError::RotationConflict(_)
                | CheckpointError::PersistenceError(_)
        )
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointError::SerializationError(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CheckpointError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CheckpointError::CryptoError(err.to_string())
    }
}

impl From<VerificationFailure> for CheckpointError {
    fn from(failure: VerificationFailure) -> Self {
        CheckpointError::VerificationFailure(failure)
    }
}
