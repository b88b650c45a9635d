//! Checkpoint verification
//!
//! Verification is side-effect free apart from alerts, and may run in
//! parallel with signing. A checkpoint is rejected unless:
//!
//! 1. The snapshot recomputes to the checkpoint's `snapshot_hash`
//! 2. Version and schema version agree with the snapshot, and the timestamp
//!    has no precision below one millisecond
//! 3. Its timestamp is within the configured skew of the verifier's clock
//! 4. The accept policy is satisfied by signatures from trusted anchors
//!
//! Historical verification skips the freshness check and also accepts
//! anchors that have since gone `inactive`. Revoked anchors are never
//! accepted.

use chrono::{DateTime, Utc};
use checkpoint_core::{
    crypto::verify_signature, AcceptPolicy, Checkpoint, CheckpointBuilder, RegistrySnapshot, Result,
    Signature, VerificationFailure, VerificationReport,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertKind, AlertSink};
use crate::config::VerifierConfig;
use crate::storage::TrustAnchorStore;

#[derive(Debug, Clone, Copy)]
enum Mode {
    Live(DateTime<Utc>),
    Historical,
}

/// Verifies checkpoints against the trust anchor store
#[derive(Debug, Clone)]
pub struct CheckpointVerifier {
    anchors: Arc<dyn TrustAnchorStore>,
    config: VerifierConfig,
    alerts: Arc<dyn AlertSink>,
}

impl CheckpointVerifier {
    pub fn new(anchors: Arc<dyn TrustAnchorStore>, config: VerifierConfig, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            anchors,
            config,
            alerts,
        }
    }

    /// Verifier configuration
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify a freshly received checkpoint against the current clock
    pub async fn verify(&self, checkpoint: &Checkpoint, snapshot: &RegistrySnapshot) -> Result<VerificationReport> {
        self.verify_at(checkpoint, snapshot, Utc::now()).await
    }

    /// Verify a checkpoint as if the clock read `now`
    pub async fn verify_at(
        &self,
        checkpoint: &Checkpoint,
        snapshot: &RegistrySnapshot,
        now: DateTime<Utc>,
    ) -> Result<VerificationReport> {
        self.run(checkpoint, snapshot, Mode::Live(now)).await
    }

    /// Re-verify an archived checkpoint
    ///
    /// Freshness is not checked, and anchors that are `inactive` today still
    /// count as long as the checkpoint falls inside their validity period.
    pub async fn verify_historical(
        &self,
        checkpoint: &Checkpoint,
        snapshot: &RegistrySnapshot,
    ) -> Result<VerificationReport> {
        self.run(checkpoint, snapshot, Mode::Historical).await
    }

    async fn run(&self, checkpoint: &Checkpoint, snapshot: &RegistrySnapshot, mode: Mode) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();

        let expected = checkpoint.snapshot_hash_hex();
        match CheckpointBuilder::compute_hash(snapshot) {
            Ok(hash) if hash == checkpoint.snapshot_hash => {}
            Ok(hash) => {
                report.reasons.push(VerificationFailure::BadHash {
                    expected,
                    actual: hex::encode(hash),
                });
                return Ok(self.finish(checkpoint, report));
            }
            Err(e) => {
                report.reasons.push(VerificationFailure::BadHash {
                    expected,
                    actual: format!("unhashable snapshot: {}", e),
                });
                return Ok(self.finish(checkpoint, report));
            }
        }

        report.reasons.extend(Self::header_mismatches(checkpoint, snapshot));
        if !report.reasons.is_empty() {
            return Ok(self.finish(checkpoint, report));
        }

        let mut fresh = true;
        if let Mode::Live(now) = mode {
            let skew = if checkpoint.timestamp > now {
                checkpoint.timestamp - now
            } else {
                now - checkpoint.timestamp
            };
            if skew > self.config.max_skew() {
                fresh = false;
                report.reasons.push(VerificationFailure::StaleTimestamp {
                    timestamp: checkpoint.timestamp,
                    now,
                    max_skew_secs: self.config.max_skew().num_seconds(),
                });
            }
        }

        if checkpoint.signatures.is_empty() {
            report.reasons.push(VerificationFailure::NoSignatures);
            return Ok(self.finish(checkpoint, report));
        }

        let digest = checkpoint.digest();
        let mut failed = 0usize;
        for signature in &checkpoint.signatures {
            match self.check_signature(signature, &digest, checkpoint.timestamp, mode).await? {
                None => {
                    if !report.matched_key_ids.contains(&signature.signer_key_id) {
                        report.matched_key_ids.push(signature.signer_key_id.clone());
                    }
                }
                Some(reason) => {
                    failed += 1;
                    report.reasons.push(reason);
                }
            }
        }

        let policy_met = match self.config.policy() {
            AcceptPolicy::AnyValidSignature => !report.matched_key_ids.is_empty(),
            AcceptPolicy::AllSignaturesValid => failed == 0,
        };
        report.valid = fresh && policy_met;

        Ok(self.finish(checkpoint, report))
    }

    fn header_mismatches(checkpoint: &Checkpoint, snapshot: &RegistrySnapshot) -> Vec<VerificationFailure> {
        let mut reasons = Vec::new();
        if checkpoint.version != snapshot.version {
            reasons.push(VerificationFailure::SnapshotMismatch {
                field: "version".into(),
                checkpoint: checkpoint.version,
                snapshot: snapshot.version,
            });
        }
        if checkpoint.schema_version != snapshot.schema_version {
            reasons.push(VerificationFailure::SnapshotMismatch {
                field: "schema_version".into(),
                checkpoint: checkpoint.schema_version.into(),
                snapshot: snapshot.schema_version.into(),
            });
        }
        if !checkpoint.has_canonical_timestamp() {
            reasons.push(VerificationFailure::NonCanonicalTimestamp {
                timestamp: checkpoint.timestamp,
            });
        }
        reasons
    }

    /// `None` when the signature is accepted
    async fn check_signature(
        &self,
        signature: &Signature,
        digest: &[u8; 32],
        timestamp: DateTime<Utc>,
        mode: Mode,
    ) -> Result<Option<VerificationFailure>> {
        let key_id = signature.signer_key_id.clone();

        let Some(anchor) = self.anchors.get(&key_id).await? else {
            return Ok(Some(VerificationFailure::UntrustedKey { key_id }));
        };

        if anchor.is_revoked() {
            return Ok(Some(VerificationFailure::RevokedKey { key_id }));
        }
        if anchor.algorithm != signature.algorithm {
            return Ok(Some(VerificationFailure::AlgorithmMismatch {
                key_id,
                expected: anchor.algorithm,
                actual: signature.algorithm,
            }));
        }

        let trusted = match mode {
            Mode::Live(_) => anchor.is_trusted_at(timestamp),
            Mode::Historical => anchor.covers(timestamp),
        };
        if !trusted {
            return Ok(Some(VerificationFailure::UntrustedKey { key_id }));
        }

        if !verify_signature(digest, signature, &anchor.public_key_material) {
            return Ok(Some(VerificationFailure::BadSignature { key_id }));
        }
        Ok(None)
    }

    fn finish(&self, checkpoint: &Checkpoint, report: VerificationReport) -> VerificationReport {
        if report.valid {
            debug!(
                version = checkpoint.version,
                matched = ?report.matched_key_ids,
                "Checkpoint verified"
            );
            return report;
        }

        let summary = report
            .reasons
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        warn!(
            version = checkpoint.version,
            policy = %self.config.policy(),
            reasons = %summary,
            "Checkpoint rejected"
        );
        self.alerts.raise(
            Alert::new(AlertKind::VerificationFailed, format!("checkpoint rejected: {}", summary))
                .with_version(checkpoint.version),
        );
        report
    }

    /// Verify and, if accepted, advance `last_known_good`
    pub async fn apply_if_valid(
        &self,
        last_known_good: &LastKnownGood,
        checkpoint: &Checkpoint,
        snapshot: &RegistrySnapshot,
    ) -> Result<ApplyOutcome> {
        let mut current = last_known_good.state.lock().await;

        if let Some((applied, _)) = current.as_ref() {
            if checkpoint.version <= applied.version {
                return Ok(ApplyOutcome::NotNewer {
                    current: applied.version,
                });
            }
        }

        let report = self.verify(checkpoint, snapshot).await?;
        if !report.valid {
            return Ok(ApplyOutcome::Rejected(report));
        }

        *current = Some((checkpoint.clone(), snapshot.clone()));
        Ok(ApplyOutcome::Applied {
            version: checkpoint.version,
        })
    }
}

/// Replica-side holder of the newest accepted checkpoint
#[derive(Debug, Default)]
pub struct LastKnownGood {
    state: tokio::sync::Mutex<Option<(Checkpoint, RegistrySnapshot)>>,
}

impl LastKnownGood {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the applied checkpoint
    pub async fn version(&self) -> Option<u64> {
        self.state.lock().await.as_ref().map(|(c, _)| c.version)
    }

    /// Applied snapshot
    pub async fn snapshot(&self) -> Option<RegistrySnapshot> {
        self.state.lock().await.as_ref().map(|(_, s)| s.clone())
    }
}

/// What `apply_if_valid` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { version: u64 },
    Rejected(VerificationReport),
    NotNewer { current: u64 },
}
