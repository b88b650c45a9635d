//! Signing key lifecycle types
//!
//! ```text
//! pending ──► active ──► retiring ──► inactive
//!    │          │           │            │
//!    └──────────┴───────────┴────────────┴──► revoked (terminal)
//! ```
//!
//! `active` keys sign new checkpoints. `retiring` keys keep co-signing until
//! their overlap window ends, then become `inactive`. Inactive keys no longer
//! sign but their trust anchors keep historical checkpoints verifiable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, Result};
use crate::snapshot::sha256;
use crate::types::{serde_bytes_base64, Algorithm};

/// Lifecycle state of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Registered, not yet signing
    Pending,
    /// Primary signer
    Active,
    /// Superseded; co-signs during the overlap window
    Retiring,
    /// No longer signs; still verifies history
    Inactive,
    /// Compromised or withdrawn; terminal
    Revoked,
}

impl KeyStatus {
    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        use KeyStatus::*;
        match (self, next) {
            (Revoked, _) => false,
            (_, Revoked) => true,
            (Pending, Active) | (Active, Retiring) | (Retiring, Inactive) => true,
            _ => false,
        }
    }

    /// Whether signatures from keys in this state may be produced
    pub fn can_sign(&self) -> bool {
        matches!(self, KeyStatus::Active | KeyStatus::Retiring)
    }

    /// Whether the trust anchor is part of the current trusted set
    pub fn is_trusted(&self) -> bool {
        matches!(self, KeyStatus::Active | KeyStatus::Pending | KeyStatus::Retiring)
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, KeyStatus::Revoked)
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStatus::Pending => write!(f, "pending"),
            KeyStatus::Active => write!(f, "active"),
            KeyStatus::Retiring => write!(f, "retiring"),
            KeyStatus::Inactive => write!(f, "inactive"),
            KeyStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// Overlap requested when activating a new key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapWindow {
    /// The outgoing key co-signs the next `n - 1` checkpoints
    Checkpoints(u64),
    /// The outgoing key co-signs until the duration elapses
    Duration(Duration),
    /// The outgoing key stops signing immediately
    Immediate,
}

impl OverlapWindow {
    /// Resolve the window against the last committed version and the clock
    ///
    /// Fails with `ConfigError` when a duration window ends outside the
    /// representable time range.
    pub fn end(&self, last_version: u64, now: DateTime<Utc>) -> Result<OverlapEnd> {
        match self {
            OverlapWindow::Checkpoints(n) => Ok(OverlapEnd::AfterVersion(last_version.saturating_add(*n))),
            OverlapWindow::Duration(d) => now
                .checked_add_signed(*d)
                .map(OverlapEnd::At)
                .ok_or_else(|| CheckpointError::ConfigError(format!("overlap duration out of range: {}", d))),
            OverlapWindow::Immediate => Ok(OverlapEnd::AfterVersion(last_version.saturating_add(1))),
        }
    }
}

/// Recorded end of a retiring key's overlap window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OverlapEnd {
    /// Co-signs checkpoints with `version < n`
    AfterVersion(u64),
    /// Co-signs until this instant
    At(DateTime<Utc>),
}

impl OverlapEnd {
    /// Whether the window no longer covers a checkpoint at `next_version` built at `now`
    pub fn has_elapsed(&self, next_version: u64, now: DateTime<Utc>) -> bool {
        match self {
            OverlapEnd::AfterVersion(end) => next_version >= *end,
            OverlapEnd::At(end) => now >= *end,
        }
    }
}

/// A signing key known to the key manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// Key identifier
    pub key_id: String,

    /// Signature algorithm
    pub algorithm: Algorithm,

    /// Reference understood by the key store (e.g. `mem:k1`, `hsm:slot-4`)
    pub key_ref: String,

    /// Verification material
    #[serde(with = "serde_bytes_base64")]
    pub public_key: Vec<u8>,

    /// Lifecycle state
    pub status: KeyStatus,

    /// Start of validity
    pub valid_from: DateTime<Utc>,

    /// End of validity, if bounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// Key that replaced this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,

    /// End of the overlap window once retiring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_until: Option<OverlapEnd>,

    /// When the key became active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl SigningKey {
    /// Describe a freshly registered key
    pub fn pending(
        key_id: impl Into<String>,
        algorithm: Algorithm,
        key_ref: impl Into<String>,
        public_key: Vec<u8>,
        valid_from: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            key_ref: key_ref.into(),
            public_key,
            status: KeyStatus::Pending,
            valid_from,
            valid_until: None,
            superseded_by: None,
            overlap_until: None,
            activated_at: None,
        }
    }

    /// Bound the validity period (builder pattern)
    pub fn valid_until(mut self, until: DateTime<Utc>) -> Self {
        self.valid_until = Some(until);
        self
    }

    /// Apply a lifecycle transition
    pub fn transition(&mut self, next: KeyStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CheckpointError::InvalidTransition {
                key_id: self.key_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether `at` falls inside the validity period
    pub fn is_time_valid(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_until.map_or(true, |until| at < until)
    }

    /// Trust anchor entry describing this key
    pub fn to_trust_anchor(&self, added_at: DateTime<Utc>) -> TrustAnchorEntry {
        TrustAnchorEntry {
            key_id: self.key_id.clone(),
            public_key_material: self.public_key.clone(),
            algorithm: self.algorithm,
            status: self.status,
            added_at,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            revoked_at: None,
            revocation_reason: None,
        }
    }
}

/// A public key trusted for verification
///
/// Entries are never deleted; only `status` and the revocation fields change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchorEntry {
    /// Key identifier
    pub key_id: String,

    /// Verification material (shared secret for HMAC)
    #[serde(with = "serde_bytes_base64")]
    pub public_key_material: Vec<u8>,

    /// Signature algorithm
    pub algorithm: Algorithm,

    /// Mirrored lifecycle state
    pub status: KeyStatus,

    /// When the anchor was added
    pub added_at: DateTime<Utc>,

    /// Start of validity
    pub valid_from: DateTime<Utc>,

    /// End of validity, if bounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// When the key was revoked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,

    /// Why the key was revoked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl TrustAnchorEntry {
    /// Whether the anchor is revoked
    pub fn is_revoked(&self) -> bool {
        self.status == KeyStatus::Revoked
    }

    /// Whether the anchor is in the trusted set at `at`
    pub fn is_trusted_at(&self, at: DateTime<Utc>) -> bool {
        self.status.is_trusted()
            && at >= self.valid_from
            && self.valid_until.map_or(true, |until| at < until)
    }

    /// Whether `at` falls inside the validity period, regardless of status
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_until.map_or(true, |until| at < until)
    }

    /// Hex SHA-256 of the verification material
    pub fn fingerprint(&self) -> String {
        hex::encode(sha256(&self.public_key_material))
    }
}

/// Audit record of a revocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Revoked key
    pub key_id: String,

    /// When it was revoked
    pub revoked_at: DateTime<Utc>,

    /// Operator-supplied reason
    pub reason: String,

    /// Operator or subsystem that revoked it
    pub revoked_by: String,
}
