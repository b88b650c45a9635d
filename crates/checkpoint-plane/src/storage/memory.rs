//! In-memory storage backends
//!
//! Default storage for development, tests and single-instance deployments.
//! Data is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint_core::{Algorithm, KeyStatus, RevocationRecord, TrustAnchorEntry};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{info, warn};

use super::{CheckpointStore, StorageError, StoredCheckpoint, TrustAnchorStore};

pub(super) fn poisoned(what: &str) -> StorageError {
    StorageError::Lock(format!("{} lock poisoned", what))
}

/// Arena of anchors plus a key ID index
///
/// Mutations are split into a checked step that returns the new records and
/// an apply step, so a persistent store can journal the records in between.
#[derive(Debug, Default)]
pub(super) struct AnchorArena {
    entries: Vec<TrustAnchorEntry>,
    index: HashMap<String, usize>,
    revocations: Vec<RevocationRecord>,
}

impl AnchorArena {
    fn lookup(&self, key_id: &str) -> Result<&TrustAnchorEntry, StorageError> {
        self.index
            .get(key_id)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| StorageError::NotFound(key_id.to_string()))
    }

    pub(super) fn get(&self, key_id: &str) -> Option<TrustAnchorEntry> {
        self.index.get(key_id).map(|&idx| self.entries[idx].clone())
    }

    pub(super) fn entries(&self) -> &[TrustAnchorEntry] {
        &self.entries
    }

    pub(super) fn revocations(&self) -> &[RevocationRecord] {
        &self.revocations
    }

    pub(super) fn check_new(&self, key_id: &str) -> Result<(), StorageError> {
        if self.index.contains_key(key_id) {
            return Err(StorageError::AlreadyExists(key_id.to_string()));
        }
        Ok(())
    }

    /// Insert a new entry or replace the entry with the same key ID in place
    pub(super) fn upsert(&mut self, entry: TrustAnchorEntry) {
        match self.index.get(&entry.key_id) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.index.insert(entry.key_id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Entry after a status change, without applying it
    pub(super) fn with_status(
        &self,
        key_id: &str,
        status: KeyStatus,
        now: DateTime<Utc>,
    ) -> Result<TrustAnchorEntry, StorageError> {
        let mut entry = self.lookup(key_id)?.clone();
        if entry.is_revoked() {
            return Err(StorageError::Revoked(key_id.to_string()));
        }
        if status == KeyStatus::Revoked {
            entry.revoked_at.get_or_insert(now);
        }
        entry.status = status;
        Ok(entry)
    }

    /// Original record when the key is already revoked
    pub(super) fn existing_revocation(&self, key_id: &str) -> Result<Option<RevocationRecord>, StorageError> {
        if !self.lookup(key_id)?.is_revoked() {
            return Ok(None);
        }
        Ok(self.revocations.iter().find(|r| r.key_id == key_id).cloned())
    }

    /// Revoked entry and audit record, without applying them
    pub(super) fn revoked(
        &self,
        key_id: &str,
        reason: &str,
        revoked_by: &str,
        now: DateTime<Utc>,
    ) -> Result<(TrustAnchorEntry, RevocationRecord), StorageError> {
        let mut entry = self.lookup(key_id)?.clone();
        entry.status = KeyStatus::Revoked;
        entry.revoked_at = Some(now);
        entry.revocation_reason = Some(reason.to_string());

        let record = RevocationRecord {
            key_id: key_id.to_string(),
            revoked_at: now,
            reason: reason.to_string(),
            revoked_by: revoked_by.to_string(),
        };
        Ok((entry, record))
    }

    /// Apply an audit record; the anchor it names is forced to `revoked`
    pub(super) fn record_revocation(&mut self, record: RevocationRecord) {
        if let Some(&idx) = self.index.get(&record.key_id) {
            let entry = &mut self.entries[idx];
            entry.status = KeyStatus::Revoked;
            entry.revoked_at.get_or_insert(record.revoked_at);
            entry.revocation_reason.get_or_insert_with(|| record.reason.clone());
        }
        if !self.revocations.iter().any(|r| r.key_id == record.key_id) {
            self.revocations.push(record);
        }
    }
}

/// In-memory trust anchor store
#[derive(Debug, Default)]
pub struct MemoryAnchorStore {
    arena: RwLock<AnchorArena>,
}

impl MemoryAnchorStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustAnchorStore for MemoryAnchorStore {
    // =========================================================================
    // Anchors
    // =========================================================================

    async fn add(&self, entry: TrustAnchorEntry) -> Result<(), StorageError> {
        let mut arena = self.arena.write().map_err(|_| poisoned("anchor"))?;
        arena.check_new(&entry.key_id)?;

        info!(
            key_id = %entry.key_id,
            algorithm = %entry.algorithm,
            fingerprint = %entry.fingerprint(),
            "Adding trust anchor"
        );
        arena.upsert(entry);
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<TrustAnchorEntry>, StorageError> {
        let arena = self.arena.read().map_err(|_| poisoned("anchor"))?;
        Ok(arena.get(key_id))
    }

    async fn get_trusted_keys(&self, at: DateTime<Utc>) -> Result<Vec<TrustAnchorEntry>, StorageError> {
        let arena = self.arena.read().map_err(|_| poisoned("anchor"))?;
        Ok(arena
            .entries()
            .iter()
            .filter(|e| e.is_trusted_at(at))
            .cloned()
            .collect())
    }

    async fn by_algorithm(&self, algorithm: Algorithm) -> Result<Vec<TrustAnchorEntry>, StorageError> {
        let arena = self.arena.read().map_err(|_| poisoned("anchor"))?;
        Ok(arena
            .entries()
            .iter()
            .filter(|e| e.algorithm == algorithm)
            .cloned()
            .collect())
    }

    async fn set_status(&self, key_id: &str, status: KeyStatus) -> Result<(), StorageError> {
        let mut arena = self.arena.write().map_err(|_| poisoned("anchor"))?;
        let entry = arena.with_status(key_id, status, Utc::now())?;
        arena.upsert(entry);
        Ok(())
    }

    async fn history(&self) -> Result<Vec<TrustAnchorEntry>, StorageError> {
        let arena = self.arena.read().map_err(|_| poisoned("anchor"))?;
        Ok(arena.entries().to_vec())
    }

    // =========================================================================
    // Revocation
    // =========================================================================

    async fn revoke(
        &self,
        key_id: &str,
        reason: &str,
        revoked_by: &str,
    ) -> Result<RevocationRecord, StorageError> {
        let mut arena = self.arena.write().map_err(|_| poisoned("anchor"))?;
        if let Some(existing) = arena.existing_revocation(key_id)? {
            return Ok(existing);
        }

        let (entry, record) = arena.revoked(key_id, reason, revoked_by, Utc::now())?;
        warn!(key_id = %key_id, reason = %reason, revoked_by = %revoked_by, "Trust anchor revoked");
        arena.upsert(entry);
        arena.record_revocation(record.clone());
        Ok(record)
    }

    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError> {
        let arena = self.arena.read().map_err(|_| poisoned("anchor"))?;
        Ok(arena.revocations().to_vec())
    }
}

/// In-memory checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<u64, StoredCheckpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, stored: StoredCheckpoint) -> Result<(), StorageError> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| poisoned("checkpoint"))?;

        let version = stored.version();
        if let Some((&latest, _)) = checkpoints.last_key_value() {
            if version <= latest {
                return Err(StorageError::NonMonotonic {
                    latest,
                    attempted: version,
                });
            }
        }

        info!(version = version, hash = %stored.checkpoint.snapshot_hash_hex(), "Checkpoint stored");
        checkpoints.insert(version, stored);
        Ok(())
    }

    async fn get(&self, version: u64) -> Result<Option<StoredCheckpoint>, StorageError> {
        let checkpoints = self.checkpoints.read().map_err(|_| poisoned("checkpoint"))?;
        Ok(checkpoints.get(&version).cloned())
    }

    async fn latest_version(&self) -> Result<Option<u64>, StorageError> {
        let checkpoints = self.checkpoints.read().map_err(|_| poisoned("checkpoint"))?;
        Ok(checkpoints.keys().next_back().copied())
    }

    async fn versions(&self) -> Result<Vec<u64>, StorageError> {
        let checkpoints = self.checkpoints.read().map_err(|_| poisoned("checkpoint"))?;
        Ok(checkpoints.keys().copied().collect())
    }
}
