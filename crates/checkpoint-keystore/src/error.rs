//! Error types for the key store

use checkpoint_core::CheckpointError;
use thiserror::Error;

/// Result type for key store operations
pub type Result<T> = std::result::Result<T, KeyStoreError>;

/// Errors that can occur while retrieving signing material
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// Key reference could not be parsed
    #[error("Invalid key reference: {0}")]
    InvalidKeyRef(String),

    /// No backend registered for the reference scheme
    #[error("No backend registered for scheme: {0}")]
    UnsupportedScheme(String),

    /// Backend has no material under this locator
    #[error("Key material not found: {0}")]
    KeyNotFound(String),

    /// Stored material could not be decoded
    #[error("Invalid key material for {locator}: {reason}")]
    InvalidMaterial { locator: String, reason: String },

    /// Backend (e.g. HSM) not reachable
    #[error("Key backend unavailable: {0}")]
    BackendUnavailable(String),

    /// I/O error from a file backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<KeyStoreError> for CheckpointError {
    fn from(err: KeyStoreError) -> Self {
        CheckpointError::SigningError(err.to_string())
    }
}
