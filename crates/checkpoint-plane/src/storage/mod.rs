//! Storage abstraction for trust anchors and checkpoints
//!
//! Both stores are append-only. Trust anchors are never deleted, only
//! status-flagged, so historical checkpoints stay verifiable. Checkpoints are
//! never overwritten once persisted.

pub mod fs;
pub mod memory;

pub use fs::{FsAnchorStore, FsCheckpointStore};
pub use memory::{MemoryAnchorStore, MemoryCheckpointStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint_core::{
    Algorithm, Checkpoint, CheckpointError, CheckpointMeta, KeyStatus, RegistrySnapshot,
    RevocationRecord, TrustAnchorEntry,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Version {attempted} does not follow latest version {latest}")]
    NonMonotonic { latest: u64, attempted: u64 },

    #[error("Key '{0}' is revoked; status is terminal")]
    Revoked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StorageError> for CheckpointError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists(id) => CheckpointError::DuplicateKey(id),
            StorageError::NotFound(id) => CheckpointError::UnknownKey(id),
            StorageError::NonMonotonic { latest, attempted } => CheckpointError::RotationConflict(format!(
                "checkpoint version {} already superseded by {}",
                attempted, latest
            )),
            other => CheckpointError::PersistenceError(other.to_string()),
        }
    }
}

/// Append-only store of trust anchors
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait TrustAnchorStore: Send + Sync + Debug {
    // =========================================================================
    // Anchors
    // =========================================================================

    /// Add an anchor; duplicate key IDs are rejected
    async fn add(&self, entry: TrustAnchorEntry) -> Result<(), StorageError>;

    /// Look up an anchor by key ID, whatever its status
    async fn get(&self, key_id: &str) -> Result<Option<TrustAnchorEntry>, StorageError>;

    /// Anchors that are active, pending or retiring and time-valid at `at`
    async fn get_trusted_keys(&self, at: DateTime<Utc>) -> Result<Vec<TrustAnchorEntry>, StorageError>;

    /// All anchors for one algorithm
    async fn by_algorithm(&self, algorithm: Algorithm) -> Result<Vec<TrustAnchorEntry>, StorageError>;

    /// Mirror a lifecycle transition; refuses to leave `revoked`
    async fn set_status(&self, key_id: &str, status: KeyStatus) -> Result<(), StorageError>;

    /// Every anchor ever added, in insertion order
    async fn history(&self) -> Result<Vec<TrustAnchorEntry>, StorageError>;

    // =========================================================================
    // Revocation
    // =========================================================================

    /// Flag an anchor revoked and record why
    ///
    /// Revoking an already revoked anchor returns the original record.
    async fn revoke(
        &self,
        key_id: &str,
        reason: &str,
        revoked_by: &str,
    ) -> Result<RevocationRecord, StorageError>;

    /// Revocation audit trail, oldest first
    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError>;
}

/// A persisted checkpoint with the snapshot it commits to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub checkpoint: Checkpoint,
    pub snapshot: RegistrySnapshot,
    pub meta: CheckpointMeta,
}

impl StoredCheckpoint {
    /// Checkpoint version
    pub fn version(&self) -> u64 {
        self.checkpoint.version
    }
}

/// Which checkpoint to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSelector {
    Latest,
    Version(u64),
}

impl std::str::FromStr for CheckpointSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(CheckpointSelector::Latest);
        }
        s.parse()
            .map(CheckpointSelector::Version)
            .map_err(|_| format!("expected a version number or 'latest', got '{}'", s))
    }
}

/// Append-only checkpoint persistence
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Persist a checkpoint; versions must strictly increase and never repeat
    async fn put(&self, stored: StoredCheckpoint) -> Result<(), StorageError>;

    /// Fetch one version
    async fn get(&self, version: u64) -> Result<Option<StoredCheckpoint>, StorageError>;

    /// Highest persisted version
    async fn latest_version(&self) -> Result<Option<u64>, StorageError>;

    /// Every persisted version, ascending
    async fn versions(&self) -> Result<Vec<u64>, StorageError>;

    /// Fetch the newest checkpoint
    async fn latest(&self) -> Result<Option<StoredCheckpoint>, StorageError> {
        match self.latest_version().await? {
            Some(version) => self.get(version).await,
            None => Ok(None),
        }
    }

    /// Resolve a selector
    async fn select(&self, selector: CheckpointSelector) -> Result<Option<StoredCheckpoint>, StorageError> {
        match selector {
            CheckpointSelector::Latest => self.latest().await,
            CheckpointSelector::Version(version) => self.get(version).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parsing() {
        assert_eq!("latest".parse::<CheckpointSelector>().unwrap(), CheckpointSelector::Latest);
        assert_eq!("LATEST".parse::<CheckpointSelector>().unwrap(), CheckpointSelector::Latest);
        assert_eq!("42".parse::<CheckpointSelector>().unwrap(), CheckpointSelector::Version(42));
        assert!("-1".parse::<CheckpointSelector>().is_err());
        assert!("newest".parse::<CheckpointSelector>().is_err());
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: CheckpointError = StorageError::AlreadyExists("k1".into()).into();
        assert!(matches!(err, CheckpointError::DuplicateKey(_)));

        let err: CheckpointError = StorageError::NonMonotonic { latest: 4, attempted: 4 }.into();
        assert!(matches!(err, CheckpointError::RotationConflict(_)));

        let err: CheckpointError = StorageError::Corrupt("v3".into()).into();
        assert!(matches!(err, CheckpointError::PersistenceError(_)));
    }
}
