//! Filesystem storage backends
//!
//! Checkpoints, one directory per version:
//!
//! ```text
//! <root>/v00000000000000000007/
//!     checkpoint.json   canonical snapshot, version, timestamp, snapshot hash
//!     checkpoint.sig    JSON array of algorithm-tagged detached signatures
//!     meta.json         signer key ids, algorithms, config version
//! ```
//!
//! A version directory is written under a temporary name and renamed into
//! place, so readers never see a partial checkpoint.
//!
//! Trust anchors, two append-only JSON Lines journals:
//!
//! ```text
//! <root>/anchors/
//!     anchors.jsonl       full anchor entry after every change; last line per key wins
//!     revocations.jsonl   revocation audit records
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint_core::{
    Algorithm, Checkpoint, CheckpointMeta, KeyStatus, RegistrySnapshot, RevocationRecord, Signature,
    TrustAnchorEntry,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::memory::{poisoned, AnchorArena};
use super::{CheckpointStore, StorageError, StoredCheckpoint, TrustAnchorStore};

const CHECKPOINT_FILE: &str = "checkpoint.json";
const SIGNATURE_FILE: &str = "checkpoint.sig";
const META_FILE: &str = "meta.json";
const ANCHOR_DIR: &str = "anchors";
const ANCHOR_JOURNAL: &str = "anchors.jsonl";
const REVOCATION_JOURNAL: &str = "revocations.jsonl";

/// Contents of `checkpoint.json`
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointBody {
    version: u64,
    schema_version: u32,
    timestamp: DateTime<Utc>,
    snapshot_hash: String,
    snapshot: RegistrySnapshot,
}

/// Checkpoint store rooted at a data directory
#[derive(Debug)]
pub struct FsCheckpointStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsCheckpointStore {
    /// Open (creating if needed) a store at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "Opened checkpoint directory");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Data directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one version
    pub fn version_dir(&self, version: u64) -> PathBuf {
        self.root.join(format!("v{:020}", version))
    }

    fn parse_version_dir(name: &str) -> Option<u64> {
        let digits = name.strip_prefix('v')?;
        if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StorageError> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn put(&self, stored: StoredCheckpoint) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let version = stored.version();
        if let Some(latest) = self.latest_version().await? {
            if version <= latest {
                return Err(StorageError::NonMonotonic {
                    latest,
                    attempted: version,
                });
            }
        }

        let final_dir = self.version_dir(version);
        let staging = self.root.join(format!(".staging-{}", Uuid::new_v4()));
        tokio::fs::create_dir(&staging).await?;

        let checkpoint = &stored.checkpoint;
        let body = CheckpointBody {
            version,
            schema_version: checkpoint.schema_version,
            timestamp: checkpoint.timestamp,
            snapshot_hash: checkpoint.snapshot_hash_hex(),
            snapshot: stored.snapshot.clone(),
        };

        let written = async {
            Self::write_json(&staging.join(CHECKPOINT_FILE), &body).await?;
            Self::write_json(&staging.join(SIGNATURE_FILE), &checkpoint.signatures).await?;
            Self::write_json(&staging.join(META_FILE), &stored.meta).await?;
            tokio::fs::rename(&staging, &final_dir).await?;
            Ok::<(), StorageError>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        info!(
            version = version,
            dir = %final_dir.display(),
            signers = ?stored.meta.signer_key_ids,
            "Checkpoint persisted"
        );
        Ok(())
    }

    async fn get(&self, version: u64) -> Result<Option<StoredCheckpoint>, StorageError> {
        let dir = self.version_dir(version);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(None);
        }

        let body: CheckpointBody = Self::read_json(&dir.join(CHECKPOINT_FILE)).await?;
        let signatures: Vec<Signature> = Self::read_json(&dir.join(SIGNATURE_FILE)).await?;
        let meta: CheckpointMeta = Self::read_json(&dir.join(META_FILE)).await?;

        if body.version != version || meta.version != version {
            return Err(StorageError::Corrupt(format!(
                "{} records version {} (meta {})",
                dir.display(),
                body.version,
                meta.version
            )));
        }

        let mut snapshot_hash = [0u8; 32];
        hex::decode_to_slice(&body.snapshot_hash, &mut snapshot_hash)
            .map_err(|e| StorageError::Corrupt(format!("{}: snapshot_hash: {}", dir.display(), e)))?;

        debug!(version = version, "Checkpoint loaded");
        Ok(Some(StoredCheckpoint {
            checkpoint: Checkpoint {
                version: body.version,
                schema_version: body.schema_version,
                snapshot_hash,
                timestamp: body.timestamp,
                signatures,
            },
            snapshot: body.snapshot,
            meta,
        }))
    }

    async fn latest_version(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.versions().await?.last().copied())
    }

    async fn versions(&self) -> Result<Vec<u64>, StorageError> {
        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(Self::parse_version_dir) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

// =============================================================================
// Trust Anchors
// =============================================================================

/// Trust anchor store backed by append-only journals
///
/// The whole history is replayed into memory on open. Writers are serialized
/// and a change becomes visible only after its journal line is synced.
#[derive(Debug)]
pub struct FsAnchorStore {
    dir: PathBuf,
    arena: RwLock<AnchorArena>,
    write_lock: Mutex<()>,
}

impl FsAnchorStore {
    /// Open (creating if needed) the anchor journals under `root/anchors`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = root.into().join(ANCHOR_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let mut arena = AnchorArena::default();
        for entry in read_journal::<TrustAnchorEntry>(&dir.join(ANCHOR_JOURNAL)).await? {
            arena.upsert(entry);
        }
        // A revocation record is written before its anchor line
        for record in read_journal::<RevocationRecord>(&dir.join(REVOCATION_JOURNAL)).await? {
            arena.record_revocation(record);
        }

        info!(
            dir = %dir.display(),
            anchors = arena.entries().len(),
            revocations = arena.revocations().len(),
            "Opened trust anchor journal"
        );
        Ok(Self {
            dir,
            arena: RwLock::new(arena),
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the journals
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: Serialize>(&self, journal: &str, record: &T) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(self.dir.join(journal)).await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    fn read_arena(&self) -> Result<std::sync::RwLockReadGuard<'_, AnchorArena>, StorageError> {
        self.arena.read().map_err(|_| poisoned("anchor"))
    }

    fn write_arena(&self) -> Result<std::sync::RwLockWriteGuard<'_, AnchorArena>, StorageError> {
        self.arena.write().map_err(|_| poisoned("anchor"))
    }
}

/// Parse a JSON Lines journal
///
/// A torn final line (no trailing newline) from an interrupted append is
/// skipped; any other unreadable line is corruption.
async fn read_journal<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let complete = bytes.ends_with(b"\n");
    let lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
    let mut records = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_slice(line) {
            Ok(record) => records.push(record),
            Err(e) if !complete && i + 1 == lines.len() => {
                warn!(path = %path.display(), error = %e, "Ignoring torn final journal line");
            }
            Err(e) => {
                return Err(StorageError::Corrupt(format!("{} line {}: {}", path.display(), i + 1, e)));
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl TrustAnchorStore for FsAnchorStore {
    async fn add(&self, entry: TrustAnchorEntry) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.read_arena()?.check_new(&entry.key_id)?;

        self.append(ANCHOR_JOURNAL, &entry).await?;
        info!(
            key_id = %entry.key_id,
            algorithm = %entry.algorithm,
            fingerprint = %entry.fingerprint(),
            "Adding trust anchor"
        );
        self.write_arena()?.upsert(entry);
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<TrustAnchorEntry>, StorageError> {
        Ok(self.read_arena()?.get(key_id))
    }

    async fn get_trusted_keys(&self, at: DateTime<Utc>) -> Result<Vec<TrustAnchorEntry>, StorageError> {
        Ok(self
            .read_arena()?
            .entries()
            .iter()
            .filter(|e| e.is_trusted_at(at))
            .cloned()
            .collect())
    }

    async fn by_algorithm(&self, algorithm: Algorithm) -> Result<Vec<TrustAnchorEntry>, StorageError> {
        Ok(self
            .read_arena()?
            .entries()
            .iter()
            .filter(|e| e.algorithm == algorithm)
            .cloned()
            .collect())
    }

    async fn set_status(&self, key_id: &str, status: KeyStatus) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let entry = self.read_arena()?.with_status(key_id, status, Utc::now())?;

        self.append(ANCHOR_JOURNAL, &entry).await?;
        debug!(key_id = %key_id, status = %status, "Trust anchor status journaled");
        self.write_arena()?.upsert(entry);
        Ok(())
    }

    async fn history(&self) -> Result<Vec<TrustAnchorEntry>, StorageError> {
        Ok(self.read_arena()?.entries().to_vec())
    }

    async fn revoke(
        &self,
        key_id: &str,
        reason: &str,
        revoked_by: &str,
    ) -> Result<RevocationRecord, StorageError> {
        let _guard = self.write_lock.lock().await;
        let (entry, record) = {
            let arena = self.read_arena()?;
            if let Some(existing) = arena.existing_revocation(key_id)? {
                return Ok(existing);
            }
            arena.revoked(key_id, reason, revoked_by, Utc::now())?
        };

        self.append(REVOCATION_JOURNAL, &record).await?;
        self.append(ANCHOR_JOURNAL, &entry).await?;
        warn!(key_id = %key_id, reason = %reason, revoked_by = %revoked_by, "Trust anchor revoked");

        let mut arena = self.write_arena()?;
        arena.upsert(entry);
        arena.record_revocation(record.clone());
        Ok(record)
    }

    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError> {
        Ok(self.read_arena()?.revocations().to_vec())
    }
}
