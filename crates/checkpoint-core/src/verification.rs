//! Verification outcome types shared by verifiers and replicas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CheckpointError, Result};
use crate::types::Algorithm;

/// Why a checkpoint (or one of its signatures) was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationFailure {
    /// Recomputed snapshot hash differs from the checkpoint
    #[error("snapshot hash mismatch: checkpoint {expected}, recomputed {actual}")]
    BadHash { expected: String, actual: String },

    /// Checkpoint header disagrees with the snapshot it commits to
    #[error("checkpoint {field} {checkpoint} does not match snapshot {field} {snapshot}")]
    SnapshotMismatch {
        field: String,
        checkpoint: u64,
        snapshot: u64,
    },

    /// Timestamp finer than the millisecond precision covered by signatures
    #[error("timestamp {timestamp} has sub-millisecond precision")]
    NonCanonicalTimestamp { timestamp: DateTime<Utc> },

    /// Timestamp outside the accepted skew window
    #[error("timestamp {timestamp} outside ±{max_skew_secs}s of {now}")]
    StaleTimestamp {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
        max_skew_secs: i64,
    },

    /// Signer not present in the trust anchor store
    #[error("untrusted key: {key_id}")]
    UntrustedKey { key_id: String },

    /// Signer revoked
    #[error("revoked key: {key_id}")]
    RevokedKey { key_id: String },

    /// Signature did not verify
    #[error("bad signature from key {key_id}")]
    BadSignature { key_id: String },

    /// Signature tag disagrees with the anchor's algorithm
    #[error("algorithm mismatch for key {key_id}: anchor {expected}, signature {actual}")]
    AlgorithmMismatch {
        key_id: String,
        expected: Algorithm,
        actual: Algorithm,
    },

    /// Checkpoint carries no signatures
    #[error("checkpoint carries no signatures")]
    NoSignatures,
}

/// Which signatures must verify for a checkpoint to be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptPolicy {
    /// At least one signature from a trusted, unrevoked key verifies
    #[default]
    AnyValidSignature,
    /// Every attached signature verifies
    AllSignaturesValid,
}

impl std::fmt::Display for AcceptPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcceptPolicy::AnyValidSignature => write!(f, "any-valid-signature"),
            AcceptPolicy::AllSignaturesValid => write!(f, "all-signatures-valid"),
        }
    }
}

impl std::str::FromStr for AcceptPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any-valid-signature" | "any" | "any-valid" => Ok(AcceptPolicy::AnyValidSignature),
            "all-signatures-valid" | "all" | "all-valid" => Ok(AcceptPolicy::AllSignaturesValid),
            _ => Err(format!("Unknown accept policy: {}", s)),
        }
    }
}

/// Result of verifying one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Whether the checkpoint is accepted
    pub valid: bool,

    /// Keys whose signatures verified
    pub matched_key_ids: Vec<String>,

    /// Every problem found, including ones tolerated by the policy
    pub reasons: Vec<VerificationFailure>,
}

impl VerificationReport {
    /// Convert into an error when the checkpoint was rejected
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            return Ok(self);
        }
        let failure = self
            .reasons
            .into_iter()
            .next()
            .unwrap_or(VerificationFailure::NoSignatures);
        Err(CheckpointError::VerificationFailure(failure))
    }

    /// Whether any reason matches the predicate
    pub fn has_reason(&self, predicate: impl Fn(&VerificationFailure) -> bool) -> bool {
        self.reasons.iter().any(predicate)
    }
}
