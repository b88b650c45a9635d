//! Checkpoint and detached signature types
//!
//! A `Checkpoint` commits to a canonical snapshot through its SHA-256 hash.
//! Signatures are computed over the *checkpoint digest*, which binds the
//! version, schema version, timestamp and snapshot hash together under a
//! domain tag, so a signature cannot be lifted onto a different version or a
//! fresher timestamp.
//!
//! Timestamps carry millisecond precision. The digest hashes the RFC 3339
//! millisecond form, so a timestamp with finer precision is not canonical and
//! verifiers reject it.

use chrono::{DateTime, SecondsFormat, SubsecRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::snapshot::CanonicalSnapshot;
use crate::types::{serde_bytes_base64, serde_digest_hex, Algorithm};

/// Domain separator for checkpoint digests
const CHECKPOINT_DIGEST_DOMAIN: &[u8] = b"registry-checkpoint/v2";

/// A detached, algorithm-tagged signature over a checkpoint digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Algorithm that produced the signature
    pub algorithm: Algorithm,

    /// Key ID of the signer
    pub signer_key_id: String,

    /// Raw signature bytes
    #[serde(with = "serde_bytes_base64")]
    pub signature_bytes: Vec<u8>,

    /// When the signature was produced
    pub created_at: DateTime<Utc>,
}

/// A versioned, signed commitment to registry state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Strictly increasing per registry instance
    pub version: u64,

    /// Node record schema version of the snapshot
    pub schema_version: u32,

    /// SHA-256 over the canonical snapshot bytes
    #[serde(with = "serde_digest_hex")]
    pub snapshot_hash: [u8; 32],

    /// Creation time (UTC, millisecond precision)
    pub timestamp: DateTime<Utc>,

    /// One or more detached signatures
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Checkpoint {
    /// Create an unsigned checkpoint for a canonical snapshot
    ///
    /// The timestamp is truncated to milliseconds so that it survives a
    /// JSON round trip unchanged.
    pub fn unsigned(snapshot: &CanonicalSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: snapshot.version(),
            schema_version: snapshot.schema_version(),
            snapshot_hash: snapshot.hash(),
            timestamp: timestamp.trunc_subsecs(3),
            signatures: Vec::new(),
        }
    }

    /// The message every signer signs
    pub fn digest(&self) -> [u8; 32] {
        checkpoint_digest(self.version, self.schema_version, &self.timestamp, &self.snapshot_hash)
    }

    /// Whether the timestamp has no precision below one millisecond
    pub fn has_canonical_timestamp(&self) -> bool {
        self.timestamp.nanosecond() % 1_000_000 == 0
    }

    /// Attach a signature
    pub fn attach(&mut self, signature: Signature) {
        self.signatures.push(signature);
    }

    /// Key IDs of all attached signatures, in signing order
    pub fn signer_key_ids(&self) -> Vec<String> {
        self.signatures
            .iter()
            .map(|s| s.signer_key_id.clone())
            .collect()
    }

    /// Distinct algorithms used by attached signatures
    pub fn algorithms(&self) -> Vec<Algorithm> {
        let mut algorithms: Vec<Algorithm> = self.signatures.iter().map(|s| s.algorithm).collect();
        algorithms.sort();
        algorithms.dedup();
        algorithms
    }

    /// Whether a signature from the given key is attached
    pub fn is_signed_by(&self, key_id: &str) -> bool {
        self.signatures.iter().any(|s| s.signer_key_id == key_id)
    }

    /// Hex-encoded snapshot hash
    pub fn snapshot_hash_hex(&self) -> String {
        hex::encode(self.snapshot_hash)
    }
}

/// Compute the digest that binds version, schema version, timestamp and snapshot hash
pub fn checkpoint_digest(
    version: u64,
    schema_version: u32,
    timestamp: &DateTime<Utc>,
    snapshot_hash: &[u8; 32],
) -> [u8; 32] {
    let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut hasher = Sha256::new();
    hasher.update(CHECKPOINT_DIGEST_DOMAIN);
    hasher.update([0u8]);
    hasher.update(version.to_be_bytes());
    hasher.update(schema_version.to_be_bytes());
    hasher.update((timestamp.len() as u32).to_be_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(snapshot_hash);
    hasher.finalize().into()
}

/// Sidecar metadata persisted as `meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Checkpoint version this metadata describes
    pub version: u64,

    /// Key IDs that signed the checkpoint
    pub signer_key_ids: Vec<String>,

    /// Algorithms used
    pub algorithms: Vec<Algorithm>,

    /// Version of the service configuration that produced the checkpoint
    pub config_version: String,

    /// Whether the checkpoint was signed while in safe mode
    #[serde(default)]
    pub safe_mode: bool,
}

impl CheckpointMeta {
    /// Derive metadata from a signed checkpoint
    pub fn for_checkpoint(checkpoint: &Checkpoint, config_version: impl Into<String>, safe_mode: bool) -> Self {
        Self {
            version: checkpoint.version,
            signer_key_ids: checkpoint.signer_key_ids(),
            algorithms: checkpoint.algorithms(),
            config_version: config_version.into(),
            safe_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CheckpointBuilder;
    use crate::types::{NodeRecord, RegistrySnapshot};
    use chrono::TimeZone;

    fn canonical() -> CanonicalSnapshot {
        let snapshot = RegistrySnapshot::new(4, 1).with_node(NodeRecord::new("node-a", "10.0.0.1:7000"));
        CheckpointBuilder::build(&snapshot).unwrap()
    }

    fn sig(key_id: &str, algorithm: Algorithm) -> Signature {
        Signature {
            algorithm,
            signer_key_id: key_id.into(),
            signature_bytes: vec![1, 2, 3],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unsigned_checkpoint_fields() {
        let canonical = canonical();
        let checkpoint = Checkpoint::unsigned(&canonical, Utc::now());

        assert_eq!(checkpoint.version, 4);
        assert_eq!(checkpoint.schema_version, 1);
        assert_eq!(checkpoint.snapshot_hash, canonical.hash());
        assert!(checkpoint.signatures.is_empty());
    }

    #[test]
    fn test_digest_binds_every_field() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let hash = [7u8; 32];

        let base = checkpoint_digest(1, 1, &ts, &hash);
        assert_ne!(base, checkpoint_digest(2, 1, &ts, &hash));
        assert_ne!(base, checkpoint_digest(1, 2, &ts, &hash));
        assert_ne!(base, checkpoint_digest(1, 1, &(ts + chrono::Duration::milliseconds(1)), &hash));
        assert_ne!(base, checkpoint_digest(1, 1, &ts, &[8u8; 32]));
        assert_eq!(base, checkpoint_digest(1, 1, &ts, &hash));
    }

    #[test]
    fn test_sub_millisecond_timestamp_not_canonical() {
        let mut checkpoint = Checkpoint::unsigned(&canonical(), Utc::now());
        assert!(checkpoint.has_canonical_timestamp());

        // Invisible to the digest, so it must be rejected instead
        let digest = checkpoint.digest();
        checkpoint.timestamp += chrono::Duration::microseconds(700);
        assert_eq!(checkpoint.digest(), digest);
        assert!(!checkpoint.has_canonical_timestamp());
    }

    #[test]
    fn test_json_round_trip_preserves_digest() {
        let mut checkpoint = Checkpoint::unsigned(&canonical(), Utc::now());
        checkpoint.attach(sig("k1", Algorithm::HmacSha256));

        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, checkpoint);
        assert_eq!(restored.digest(), checkpoint.digest());
        assert!(json.contains(&checkpoint.snapshot_hash_hex()));
    }

    #[test]
    fn test_signer_listing_and_meta() {
        let mut checkpoint = Checkpoint::unsigned(&canonical(), Utc::now());
        checkpoint.attach(sig("k2", Algorithm::Dilithium2));
        checkpoint.attach(sig("k1", Algorithm::HmacSha256));

        assert!(checkpoint.is_signed_by("k1"));
        assert!(!checkpoint.is_signed_by("k3"));
        assert_eq!(checkpoint.signer_key_ids(), vec!["k2", "k1"]);
        assert_eq!(
            checkpoint.algorithms(),
            vec![Algorithm::HmacSha256, Algorithm::Dilithium2]
        );

        let meta = CheckpointMeta::for_checkpoint(&checkpoint, "cfg-1", false);
        assert_eq!(meta.version, 4);
        assert_eq!(meta.signer_key_ids.len(), 2);
        assert_eq!(meta.config_version, "cfg-1");
    }
}
