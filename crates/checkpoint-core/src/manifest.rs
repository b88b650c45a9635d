//! Signed trust-anchor manifest
//!
//! The manifest publishes every trust anchor ever added, with its current
//! status, so third parties can verify historical checkpoints without access
//! to the registry. HMAC anchors are published by fingerprint only; their
//! material is a shared secret.
//!
//! A manifest signed with an HMAC key can only be checked by holders of the
//! secret, i.e. the plane itself. `publicly_verifiable` says which case
//! applies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::checkpoint::Signature;
use crate::crypto::{verify_signature, SigningMaterial};
use crate::error::{CheckpointError, Result};
use crate::key::{KeyStatus, TrustAnchorEntry};
use crate::types::Algorithm;

/// Domain separator for manifest digests
const MANIFEST_DIGEST_DOMAIN: &[u8] = b"registry-trust-manifest/v1";

/// One anchor as published in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAnchor {
    pub key_id: String,
    pub algorithm: Algorithm,
    pub status: KeyStatus,
    pub added_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Base64 verification material; absent for symmetric algorithms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Hex SHA-256 of the verification material
    pub fingerprint: String,
}

impl From<&TrustAnchorEntry> for ManifestAnchor {
    fn from(entry: &TrustAnchorEntry) -> Self {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let public_key = if entry.algorithm.is_symmetric() {
            None
        } else {
            Some(STANDARD.encode(&entry.public_key_material))
        };

        Self {
            key_id: entry.key_id.clone(),
            algorithm: entry.algorithm,
            status: entry.status,
            added_at: entry.added_at,
            valid_from: entry.valid_from,
            valid_until: entry.valid_until,
            revoked_at: entry.revoked_at,
            public_key,
            fingerprint: entry.fingerprint(),
        }
    }
}

/// Signed listing of all trust anchors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchorManifest {
    /// When the manifest was produced
    pub issued_at: DateTime<Utc>,

    /// Anchors in insertion order
    pub anchors: Vec<ManifestAnchor>,

    /// Signature over the manifest digest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,

    /// Whether the signature can be checked with published material alone
    #[serde(default)]
    pub publicly_verifiable: bool,
}

impl TrustAnchorManifest {
    /// Build an unsigned manifest from store entries
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a TrustAnchorEntry>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            issued_at,
            anchors: entries.into_iter().map(ManifestAnchor::from).collect(),
            signature: None,
            publicly_verifiable: false,
        }
    }

    /// Digest covering everything except the signature
    pub fn digest(&self) -> Result<[u8; 32]> {
        let anchors = serde_json::to_vec(&self.anchors)?;
        let issued_at = self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut hasher = Sha256::new();
        hasher.update(MANIFEST_DIGEST_DOMAIN);
        hasher.update([0u8]);
        hasher.update(issued_at.as_bytes());
        hasher.update([0u8]);
        hasher.update(&anchors);
        Ok(hasher.finalize().into())
    }

    /// Sign the manifest with the given key
    pub fn sign(
        &mut self,
        key_id: impl Into<String>,
        algorithm: Algorithm,
        material: &SigningMaterial,
    ) -> Result<()> {
        let digest = self.digest()?;
        let signature_bytes = material.sign(algorithm, &digest)?;
        self.publicly_verifiable = !algorithm.is_symmetric();
        self.signature = Some(Signature {
            algorithm,
            signer_key_id: key_id.into(),
            signature_bytes,
            created_at: Utc::now(),
        });
        Ok(())
    }

    /// Verify the manifest signature with verification material
    pub fn verify(&self, public_key: &[u8]) -> Result<bool> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| CheckpointError::MissingField("signature".into()))?;
        if self.publicly_verifiable == signature.algorithm.is_symmetric() {
            return Ok(false);
        }
        Ok(verify_signature(&self.digest()?, signature, public_key))
    }

    /// Look up an anchor by key ID
    pub fn anchor(&self, key_id: &str) -> Option<&ManifestAnchor> {
        self.anchors.iter().find(|a| a.key_id == key_id)
    }
}
