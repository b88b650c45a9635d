//! Checkpoint service
//!
//! Single writer for checkpoints: read latest version, increment, build,
//! sign, persist. A second creation attempt while one is in flight is
//! rejected with `RotationConflict` rather than queued.
//!
//! Signing runs on the blocking pool under a per-algorithm latency budget.
//! A checkpoint is persisted only once every key in its signing set has
//! signed and every signature verifies. Any failure leaves the previous
//! checkpoint authoritative.

use chrono::Utc;
use checkpoint_core::{
    crypto::verify_signature, Checkpoint, CheckpointBuilder, CheckpointError, CheckpointMeta,
    ManifestAnchor, Result, Signature, SigningKey, TrustAnchorManifest,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertKind, AlertSink};
use crate::config::SigningBudgets;
use crate::keys::{KeyManager, RevocationManager};
use crate::registry::RegistryStore;
use crate::storage::{CheckpointSelector, CheckpointStore, StoredCheckpoint};

/// Creates, stores and serves signed checkpoints
pub struct CheckpointService {
    registry: Arc<dyn RegistryStore>,
    keys: Arc<KeyManager>,
    revocation: Arc<RevocationManager>,
    store: Arc<dyn CheckpointStore>,
    alerts: Arc<dyn AlertSink>,
    budgets: SigningBudgets,
    config_version: String,
    writer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CheckpointService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointService")
            .field("store", &self.store)
            .field("budgets", &self.budgets)
            .field("config_version", &self.config_version)
            .finish()
    }
}

impl CheckpointService {
    /// Create a service and seed the key manager from the store
    ///
    /// Use this over `new` whenever the store may already hold checkpoints,
    /// so overlap windows count from the persisted head.
    pub async fn open(
        registry: Arc<dyn RegistryStore>,
        keys: Arc<KeyManager>,
        revocation: Arc<RevocationManager>,
        store: Arc<dyn CheckpointStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        let service = Self::new(registry, keys, revocation, store, alerts);
        service.sync_committed_version().await?;
        Ok(service)
    }

    pub fn new(
        registry: Arc<dyn RegistryStore>,
        keys: Arc<KeyManager>,
        revocation: Arc<RevocationManager>,
        store: Arc<dyn CheckpointStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            registry,
            keys,
            revocation,
            store,
            alerts,
            budgets: SigningBudgets::default(),
            config_version: "1".to_string(),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Override signing latency budgets (builder pattern)
    pub fn with_budgets(mut self, budgets: SigningBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Configuration version recorded in `meta.json` (builder pattern)
    pub fn with_config_version(mut self, config_version: impl Into<String>) -> Self {
        self.config_version = config_version.into();
        self
    }

    /// Raise the key manager's committed version to the store's latest
    pub async fn sync_committed_version(&self) -> Result<Option<u64>> {
        let latest = self.store.latest_version().await?;
        if let Some(version) = latest {
            self.keys.note_committed(version);
            debug!(version = version, "Committed version seeded from store");
        }
        Ok(latest)
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn revocation(&self) -> &Arc<RevocationManager> {
        &self.revocation
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Build, sign and persist the next checkpoint
    pub async fn create_checkpoint(&self) -> Result<StoredCheckpoint> {
        let _writer = self.writer.try_lock().map_err(|_| {
            CheckpointError::RotationConflict("checkpoint creation already in progress".into())
        })?;

        let result = self.build_and_persist().await;
        if let Err(e) = &result {
            error!(error = %e, retryable = e.is_retryable(), "Checkpoint creation failed");
            if matches!(e, CheckpointError::SigningError(_)) {
                let next = self.keys.committed_version().saturating_add(1);
                self.alerts.raise(
                    Alert::new(AlertKind::SigningFailed, e.to_string()).with_version(next),
                );
            }
        }
        result
    }

    async fn build_and_persist(&self) -> Result<StoredCheckpoint> {
        let latest = self.sync_committed_version().await?;
        let next = match latest {
            Some(v) => v
                .checked_add(1)
                .ok_or_else(|| CheckpointError::SerializationError("checkpoint version overflow".into()))?,
            None => 1,
        };

        let mut snapshot = self.registry.get_current_state().await?;
        snapshot.version = next;
        let canonical = CheckpointBuilder::build(&snapshot)?;
        let mut checkpoint = Checkpoint::unsigned(&canonical, Utc::now());

        let set = self.keys.signing_set(next, checkpoint.timestamp).await?;
        let constraint = self.revocation.signing_constraint()?;
        let set = match constraint {
            Some(fallback) => {
                let restricted = set.restricted_to(fallback);
                if restricted.is_empty() {
                    return Err(CheckpointError::SigningError(format!(
                        "safe mode: no active {} key available",
                        fallback
                    )));
                }
                Arc::new(restricted)
            }
            None => set,
        };

        let digest = checkpoint.digest();
        for key in set.keys() {
            let signature = self.sign_with(key, &digest).await?;
            checkpoint.attach(signature);
        }

        for key in set.keys() {
            if self.keys.is_revoked(&key.key_id)? {
                return Err(CheckpointError::SigningError(format!(
                    "signer '{}' was revoked during the build",
                    key.key_id
                )));
            }
        }
        for (signature, key) in checkpoint.signatures.iter().zip(set.keys()) {
            if !verify_signature(&digest, signature, &key.public_key) {
                return Err(CheckpointError::SigningError(format!(
                    "signature from '{}' failed self-verification",
                    key.key_id
                )));
            }
        }

        let meta = CheckpointMeta::for_checkpoint(&checkpoint, self.config_version.clone(), constraint.is_some());
        let stored = StoredCheckpoint {
            checkpoint,
            snapshot: canonical.snapshot().clone(),
            meta,
        };
        self.store.put(stored.clone()).await?;
        self.keys.note_committed(next);

        info!(
            version = next,
            hash = %stored.checkpoint.snapshot_hash_hex(),
            signers = ?stored.meta.signer_key_ids,
            algorithms = ?stored.meta.algorithms,
            generation = set.generation(),
            safe_mode = stored.meta.safe_mode,
            "Checkpoint created"
        );
        Ok(stored)
    }

    /// One signature within the key's latency budget
    async fn sign_with(&self, key: &SigningKey, digest: &[u8; 32]) -> Result<Signature> {
        let budget = self.budgets.for_algorithm(key.algorithm);
        let algorithm = key.algorithm;
        let message = digest.to_vec();
        let started = Instant::now();

        let signing = async {
            let material = self.keys.vault().retrieve_signing_material(&key.key_ref).await?;
            let bytes = tokio::task::spawn_blocking(move || material.sign(algorithm, &message))
                .await
                .map_err(|e| CheckpointError::SigningError(format!("signing task failed: {}", e)))??;
            Ok::<Vec<u8>, CheckpointError>(bytes)
        };

        let signature_bytes = tokio::time::timeout(budget, signing).await.map_err(|_| {
            warn!(
                key_id = %key.key_id,
                algorithm = %algorithm,
                budget_ms = budget.as_millis() as u64,
                "Signing exceeded latency budget"
            );
            CheckpointError::SigningError(format!(
                "{} signature from '{}' exceeded its {}ms budget",
                algorithm,
                key.key_id,
                budget.as_millis()
            ))
        })??;

        debug!(
            key_id = %key.key_id,
            algorithm = %algorithm,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Signed checkpoint digest"
        );
        Ok(Signature {
            algorithm,
            signer_key_id: key.key_id.clone(),
            signature_bytes,
            created_at: Utc::now(),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetch a stored checkpoint
    pub async fn get_checkpoint(&self, selector: CheckpointSelector) -> Result<Option<StoredCheckpoint>> {
        Ok(self.store.select(selector).await?)
    }

    /// Persisted versions, ascending
    pub async fn list_versions(&self) -> Result<Vec<u64>> {
        Ok(self.store.versions().await?)
    }

    /// Every trust anchor ever published; HMAC secrets are replaced by fingerprints
    pub async fn list_trust_anchors(&self) -> Result<Vec<ManifestAnchor>> {
        let history = self.keys.anchors().history().await?;
        Ok(history.iter().map(ManifestAnchor::from).collect())
    }

    /// Signed trust anchor manifest
    ///
    /// Signed with an asymmetric key when one can sign, otherwise with the
    /// HMAC primary and marked not publicly verifiable. Returned unsigned
    /// when no key can sign.
    pub async fn trust_anchor_manifest(&self) -> Result<TrustAnchorManifest> {
        let now = Utc::now();
        let history = self.keys.anchors().history().await?;
        let mut manifest = TrustAnchorManifest::from_entries(&history, now);

        let Some(signer) = self.keys.publication_key(now)? else {
            warn!("No signing key; trust anchor manifest is unsigned");
            return Ok(manifest);
        };

        let material = self
            .keys
            .vault()
            .retrieve_signing_material(&signer.key_ref)
            .await?;
        manifest.sign(signer.key_id.clone(), signer.algorithm, &material)?;
        if !manifest.publicly_verifiable {
            warn!(key_id = %signer.key_id, "Trust anchor manifest signed with a symmetric key; only the plane can verify it");
        }
        debug!(key_id = %signer.key_id, anchors = manifest.anchors.len(), "Signed trust anchor manifest");
        Ok(manifest)
    }
}
