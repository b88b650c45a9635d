//! Key Manager
//!
//! Owns the signing key lifecycle:
//! - Registration of offline-generated keys as `pending`
//! - Activation with a self-test and an atomic swap of the primary key
//! - Overlap bookkeeping for retiring keys
//! - Immediate, terminal revocation
//!
//! The primary key reference lives inside the manager. Every change bumps a
//! generation counter; an activation commits only if the generation it
//! observed before its self-test is still current.

use chrono::{DateTime, Utc};
use checkpoint_core::{
    provider_for, snapshot::sha256, CheckpointError, KeyStatus, OverlapEnd, OverlapWindow, Result,
    RevocationRecord, SigningKey,
};
use checkpoint_keystore::{KeyRef, KeyVault};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::storage::TrustAnchorStore;

/// Keys that must sign one checkpoint
///
/// Built once per checkpoint and never mutated, so an activation that commits
/// mid-build does not change the signers of that build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningSet {
    generation: u64,
    keys: Vec<SigningKey>,
}

impl SigningSet {
    /// Key manager generation this set was taken from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signing keys, primary first
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Key IDs, primary first
    pub fn key_ids(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.key_id.clone()).collect()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Restrict the set to one algorithm
    pub fn restricted_to(&self, algorithm: checkpoint_core::Algorithm) -> SigningSet {
        SigningSet {
            generation: self.generation,
            keys: self
                .keys
                .iter()
                .filter(|k| k.algorithm == algorithm)
                .cloned()
                .collect(),
        }
    }
}

/// Result of a successful activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOutcome {
    /// Newly active key
    pub key_id: String,
    /// Previous primary, now retiring
    pub previous: Option<String>,
    /// End of the previous primary's overlap window
    pub overlap_until: Option<OverlapEnd>,
    /// Generation after the swap
    pub generation: u64,
}

/// Result of a revocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationOutcome {
    /// Audit record written to the trust anchor store
    pub record: RevocationRecord,
    /// Whether the revoked key was the primary
    pub was_primary: bool,
    /// The revoked key was the last active key; safe mode must take over
    pub escalated: bool,
}

#[derive(Debug, Default)]
struct KeyTable {
    keys: HashMap<String, SigningKey>,
    primary: Option<String>,
    generation: u64,
}

/// Signing key lifecycle manager
pub struct KeyManager {
    table: RwLock<KeyTable>,
    anchors: Arc<dyn TrustAnchorStore>,
    vault: Arc<KeyVault>,
    activation_gate: tokio::sync::Mutex<()>,
    committed_version: AtomicU64,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("primary", &self.primary_key_id().ok().flatten())
            .field("committed_version", &self.committed_version())
            .finish()
    }
}

impl KeyManager {
    /// Create a manager publishing anchors to `anchors` and fetching material from `vault`
    pub fn new(anchors: Arc<dyn TrustAnchorStore>, vault: Arc<KeyVault>) -> Self {
        Self {
            table: RwLock::new(KeyTable::default()),
            anchors,
            vault,
            activation_gate: tokio::sync::Mutex::new(()),
            committed_version: AtomicU64::new(0),
        }
    }

    fn read_table(&self) -> Result<RwLockReadGuard<'_, KeyTable>> {
        self.table
            .read()
            .map_err(|_| CheckpointError::PersistenceError("key table lock poisoned".into()))
    }

    fn write_table(&self) -> Result<RwLockWriteGuard<'_, KeyTable>> {
        self.table
            .write()
            .map_err(|_| CheckpointError::PersistenceError("key table lock poisoned".into()))
    }

    /// Key vault used for signing material
    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Trust anchor store the manager publishes to
    pub fn anchors(&self) -> &Arc<dyn TrustAnchorStore> {
        &self.anchors
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an offline-generated key as `pending` and publish its trust anchor
    pub async fn register_key(&self, key: SigningKey) -> Result<()> {
        if key.status != KeyStatus::Pending {
            return Err(CheckpointError::InvalidTransition {
                key_id: key.key_id,
                from: key.status,
                to: KeyStatus::Pending,
            });
        }
        if key.public_key.is_empty() {
            return Err(CheckpointError::MissingField("public_key".into()));
        }
        KeyRef::parse(&key.key_ref).map_err(|e| CheckpointError::ConfigError(e.to_string()))?;

        if self.read_table()?.keys.contains_key(&key.key_id) {
            return Err(CheckpointError::DuplicateKey(key.key_id));
        }

        match self.anchors.get(&key.key_id).await? {
            // Anchor left by an earlier run of the plane
            Some(existing) => {
                if existing.is_revoked() {
                    return Err(CheckpointError::InvalidTransition {
                        key_id: key.key_id,
                        from: KeyStatus::Revoked,
                        to: KeyStatus::Pending,
                    });
                }
                if existing.algorithm != key.algorithm || existing.public_key_material != key.public_key {
                    return Err(CheckpointError::DuplicateKey(key.key_id));
                }
                self.anchors.set_status(&key.key_id, KeyStatus::Pending).await?;
                info!(key_id = %key.key_id, previous_status = %existing.status, "Re-registering key against existing trust anchor");
            }
            None => self.anchors.add(key.to_trust_anchor(Utc::now())).await?,
        }

        let mut table = self.write_table()?;
        if table.keys.contains_key(&key.key_id) {
            return Err(CheckpointError::DuplicateKey(key.key_id));
        }
        info!(
            key_id = %key.key_id,
            algorithm = %key.algorithm,
            key_ref = %key.key_ref,
            "Registered signing key"
        );
        table.keys.insert(key.key_id.clone(), key);
        table.generation += 1;
        Ok(())
    }

    /// Mark anchors of keys this manager does not hold as `inactive`
    ///
    /// Run once at startup against a persistent anchor store: keys from an
    /// earlier run stop being trusted for new checkpoints until they are
    /// registered again. Their anchors keep historical checkpoints verifiable.
    pub async fn retire_unregistered_anchors(&self) -> Result<Vec<String>> {
        let history = self.anchors.history().await?;
        let orphaned: Vec<String> = {
            let table = self.read_table()?;
            history
                .into_iter()
                .filter(|a| a.status.is_trusted() && !table.keys.contains_key(&a.key_id))
                .map(|a| a.key_id)
                .collect()
        };

        for key_id in &orphaned {
            self.anchors.set_status(key_id, KeyStatus::Inactive).await?;
            info!(key_id = %key_id, "Trust anchor from earlier run marked inactive");
        }
        Ok(orphaned)
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Promote a pending key to primary
    ///
    /// The previous primary becomes `retiring` and co-signs until `overlap`
    /// ends. Concurrent activations are rejected with `RotationConflict`.
    pub async fn activate_key(&self, key_id: &str, overlap: OverlapWindow) -> Result<ActivationOutcome> {
        let _gate = self.activation_gate.try_lock().map_err(|_| {
            CheckpointError::RotationConflict(format!(
                "activation of '{}' rejected: another activation is in flight",
                key_id
            ))
        })?;

        let now = Utc::now();
        let (candidate, observed_generation) = {
            let table = self.read_table()?;
            let key = table
                .keys
                .get(key_id)
                .ok_or_else(|| CheckpointError::UnknownKey(key_id.to_string()))?;

            if !key.status.can_transition_to(KeyStatus::Active) {
                return Err(CheckpointError::InvalidTransition {
                    key_id: key_id.to_string(),
                    from: key.status,
                    to: KeyStatus::Active,
                });
            }
            if !key.is_time_valid(now) {
                return Err(CheckpointError::SigningError(format!(
                    "key '{}' is outside its validity period",
                    key_id
                )));
            }
            (key.clone(), table.generation)
        };

        if let Err(e) = self.self_test(&candidate, now).await {
            warn!(key_id = %key_id, error = %e, "Activation self-test failed; swap aborted");
            return Err(e);
        }

        // Resolved before the table is locked so a bad window leaves it untouched
        let overlap_end = overlap.end(self.committed_version(), now)?;
        let (outcome, changes) = {
            let mut table = self.write_table()?;
            if table.generation != observed_generation {
                return Err(CheckpointError::RotationConflict(format!(
                    "key set changed while activating '{}'",
                    key_id
                )));
            }

            let key = table
                .keys
                .get_mut(key_id)
                .ok_or_else(|| CheckpointError::UnknownKey(key_id.to_string()))?;
            key.transition(KeyStatus::Active)?;
            key.activated_at = Some(now);
            let mut changes = vec![(key_id.to_string(), KeyStatus::Active)];

            let mut overlap_until = None;
            let previous = table.primary.clone().filter(|p| p != key_id);
            if let Some(prev) = previous.as_ref().and_then(|p| table.keys.get_mut(p)) {
                if prev.status == KeyStatus::Active {
                    prev.transition(KeyStatus::Retiring)?;
                    prev.superseded_by = Some(key_id.to_string());
                    prev.overlap_until = Some(overlap_end);
                    overlap_until = Some(overlap_end);
                    changes.push((prev.key_id.clone(), KeyStatus::Retiring));
                }
            }

            table.primary = Some(key_id.to_string());
            table.generation += 1;

            (
                ActivationOutcome {
                    key_id: key_id.to_string(),
                    previous,
                    overlap_until,
                    generation: table.generation,
                },
                changes,
            )
        };

        for (id, status) in changes {
            self.anchors.set_status(&id, status).await?;
        }

        info!(
            key_id = %outcome.key_id,
            algorithm = %candidate.algorithm,
            previous = ?outcome.previous,
            overlap_until = ?outcome.overlap_until,
            generation = outcome.generation,
            "Signing key activated"
        );
        Ok(outcome)
    }

    /// Sign and verify a challenge with the candidate key
    async fn self_test(&self, key: &SigningKey, now: DateTime<Utc>) -> Result<()> {
        let material = self.vault.retrieve_signing_material(&key.key_ref).await?;

        let mut challenge_input = b"key-activation-self-test\0".to_vec();
        challenge_input.extend_from_slice(key.key_id.as_bytes());
        challenge_input.extend_from_slice(&now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
        let challenge = sha256(&challenge_input);

        let algorithm = key.algorithm;
        let public_key = key.public_key.clone();
        let verified = tokio::task::spawn_blocking(move || -> Result<bool> {
            let signature = material.sign(algorithm, &challenge)?;
            Ok(provider_for(algorithm).verify(&challenge, &signature, &public_key))
        })
        .await
        .map_err(|e| CheckpointError::SigningError(format!("self-test task failed: {}", e)))??;

        if !verified {
            return Err(CheckpointError::SigningError(format!(
                "self-test signature from '{}' does not verify against its registered public key",
                key.key_id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Keys that must sign the checkpoint at `next_version`
    ///
    /// Retiring keys whose overlap window has ended are demoted to
    /// `inactive` here. Fails when there is no usable primary key.
    pub async fn signing_set(&self, next_version: u64, now: DateTime<Utc>) -> Result<Arc<SigningSet>> {
        let (result, demoted) = {
            let mut table = self.write_table()?;

            let mut demoted = Vec::new();
            for key in table.keys.values_mut() {
                let elapsed = key
                    .overlap_until
                    .map_or(true, |end| end.has_elapsed(next_version, now));
                if key.status == KeyStatus::Retiring && elapsed {
                    key.transition(KeyStatus::Inactive)?;
                    demoted.push(key.key_id.clone());
                }
            }
            if !demoted.is_empty() {
                table.generation += 1;
            }

            (Self::collect_signers(&table, now), demoted)
        };

        for key_id in demoted {
            info!(key_id = %key_id, version = next_version, "Overlap window ended; key inactive");
            self.anchors.set_status(&key_id, KeyStatus::Inactive).await?;
        }

        result.map(Arc::new)
    }

    fn collect_signers(table: &KeyTable, now: DateTime<Utc>) -> Result<SigningSet> {
        let primary = table
            .primary
            .as_ref()
            .and_then(|id| table.keys.get(id))
            .filter(|k| k.status == KeyStatus::Active)
            .ok_or_else(|| CheckpointError::SigningError("no active signing key".into()))?;

        if !primary.is_time_valid(now) {
            return Err(CheckpointError::SigningError(format!(
                "active key '{}' is outside its validity period",
                primary.key_id
            )));
        }

        let mut retiring: Vec<SigningKey> = table
            .keys
            .values()
            .filter(|k| k.status == KeyStatus::Retiring && k.is_time_valid(now))
            .cloned()
            .collect();
        retiring.sort_by(|a, b| a.key_id.cmp(&b.key_id));

        let mut keys = Vec::with_capacity(retiring.len() + 1);
        keys.push(primary.clone());
        keys.extend(retiring);

        Ok(SigningSet {
            generation: table.generation,
            keys,
        })
    }

    /// Record that a checkpoint version was persisted
    pub fn note_committed(&self, version: u64) {
        self.committed_version.fetch_max(version, Ordering::SeqCst);
    }

    /// Highest persisted checkpoint version seen
    pub fn committed_version(&self) -> u64 {
        self.committed_version.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Revocation
    // =========================================================================

    /// Revoke a key immediately
    ///
    /// Does not wait for in-flight activations; their generation check fails
    /// instead. `escalated` is set when the last active key was revoked.
    pub async fn revoke_key(&self, key_id: &str, reason: &str, revoked_by: &str) -> Result<RevocationOutcome> {
        let (was_primary, escalated) = {
            let mut table = self.write_table()?;
            let key = table
                .keys
                .get_mut(key_id)
                .ok_or_else(|| CheckpointError::UnknownKey(key_id.to_string()))?;

            let was_active = key.status == KeyStatus::Active;
            key.transition(KeyStatus::Revoked)?;

            let was_primary = table.primary.as_deref() == Some(key_id);
            if was_primary {
                table.primary = None;
            }
            table.generation += 1;

            let any_active = table.keys.values().any(|k| k.status == KeyStatus::Active);
            (was_primary, was_active && !any_active)
        };

        let record = self.anchors.revoke(key_id, reason, revoked_by).await?;

        warn!(
            key_id = %key_id,
            reason = %reason,
            revoked_by = %revoked_by,
            escalated = escalated,
            "Signing key revoked"
        );
        Ok(RevocationOutcome {
            record,
            was_primary,
            escalated,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Look up a key
    pub fn get_key(&self, key_id: &str) -> Result<Option<SigningKey>> {
        Ok(self.read_table()?.keys.get(key_id).cloned())
    }

    /// All keys, ordered by key ID
    pub fn list_keys(&self) -> Result<Vec<SigningKey>> {
        let mut keys: Vec<SigningKey> = self.read_table()?.keys.values().cloned().collect();
        keys.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        Ok(keys)
    }

    /// Current primary key ID
    pub fn primary_key_id(&self) -> Result<Option<String>> {
        Ok(self.read_table()?.primary.clone())
    }

    /// Current primary key
    pub fn primary_key(&self) -> Result<Option<SigningKey>> {
        let table = self.read_table()?;
        Ok(table.primary.as_ref().and_then(|id| table.keys.get(id)).cloned())
    }

    /// Key for signing published documents such as the anchor manifest
    ///
    /// Prefers an asymmetric key that can sign (the primary first, then
    /// retiring keys) so third parties can verify; falls back to the primary.
    pub fn publication_key(&self, now: DateTime<Utc>) -> Result<Option<SigningKey>> {
        let table = self.read_table()?;
        let usable = |k: &&SigningKey| k.status.can_sign() && k.is_time_valid(now);

        let primary = table.primary.as_ref().and_then(|id| table.keys.get(id)).filter(usable);
        if let Some(key) = primary.filter(|k| !k.algorithm.is_symmetric()) {
            return Ok(Some(key.clone()));
        }

        let mut asymmetric: Vec<&SigningKey> = table
            .keys
            .values()
            .filter(usable)
            .filter(|k| !k.algorithm.is_symmetric())
            .collect();
        asymmetric.sort_by(|a, b| a.key_id.cmp(&b.key_id));

        Ok(asymmetric.first().copied().or(primary).cloned())
    }

    /// Number of keys in the `active` state
    pub fn active_key_count(&self) -> Result<usize> {
        Ok(self
            .read_table()?
            .keys
            .values()
            .filter(|k| k.status == KeyStatus::Active)
            .count())
    }

    /// Pending keys of one algorithm, oldest validity first
    pub fn pending_keys(&self, algorithm: checkpoint_core::Algorithm) -> Result<Vec<SigningKey>> {
        let mut keys: Vec<SigningKey> = self
            .read_table()?
            .keys
            .values()
            .filter(|k| k.status == KeyStatus::Pending && k.algorithm == algorithm)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then_with(|| a.key_id.cmp(&b.key_id)));
        Ok(keys)
    }

    /// Whether a key is revoked
    pub fn is_revoked(&self, key_id: &str) -> Result<bool> {
        Ok(self
            .read_table()?
            .keys
            .get(key_id)
            .map_or(false, |k| k.status == KeyStatus::Revoked))
    }

    /// Current generation
    pub fn generation(&self) -> Result<u64> {
        Ok(self.read_table()?.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAnchorStore;
    use checkpoint_core::{Algorithm, KeyPair};
    use checkpoint_keystore::backends::MemoryBackend;
    use checkpoint_keystore::KeyVaultBuilder;

    struct Harness {
        manager: KeyManager,
        anchors: Arc<MemoryAnchorStore>,
        backend: Arc<MemoryBackend>,
    }

    fn harness() -> Harness {
        let anchors = Arc::new(MemoryAnchorStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let vault = KeyVaultBuilder::new()
            .with_shared(backend.clone() as Arc<dyn checkpoint_keystore::KeyMaterialBackend>)
            .build();
        let manager = KeyManager::new(anchors.clone() as Arc<dyn TrustAnchorStore>, Arc::new(vault));
        Harness {
            manager,
            anchors,
            backend,
        }
    }

    async fn register(h: &Harness, key_id: &str, algorithm: Algorithm) -> KeyPair {
        let kp = KeyPair::generate(algorithm, key_id).unwrap();
        h.backend.insert_key_pair(&kp).unwrap();
        let key = kp.to_signing_key(format!("mem:{}", key_id), Utc::now() - chrono::Duration::minutes(1));
        h.manager.register_key(key).await.unwrap();
        kp
    }

    #[tokio::test]
    async fn test_register_publishes_anchor() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;

        let anchor = h.anchors.get("k1").await.unwrap().unwrap();
        assert_eq!(anchor.status, KeyStatus::Pending);
        assert_eq!(h.manager.get_key("k1").unwrap().unwrap().status, KeyStatus::Pending);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_refs() {
        let h = harness();
        let kp = register(&h, "k1", Algorithm::HmacSha256).await;

        let dup = kp.to_signing_key("mem:k1", Utc::now());
        assert!(matches!(
            h.manager.register_key(dup).await,
            Err(CheckpointError::DuplicateKey(_))
        ));

        let other = KeyPair::generate(Algorithm::Ed25519, "k2").unwrap();
        let bad_ref = other.to_signing_key("k2-without-scheme", Utc::now());
        assert!(matches!(
            h.manager.register_key(bad_ref).await,
            Err(CheckpointError::ConfigError(_))
        ));

        let mut not_pending = other.to_signing_key("mem:k2", Utc::now());
        not_pending.status = KeyStatus::Active;
        assert!(matches!(
            h.manager.register_key(not_pending).await,
            Err(CheckpointError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_restart_retires_then_readopts_anchors() {
        let h = harness();
        let kp = register(&h, "k1", Algorithm::Ed25519).await;
        register(&h, "k2", Algorithm::HmacSha256).await;
        h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();
        h.manager.revoke_key("k2", "leaked", "ops").await.unwrap();

        // A fresh manager over the same anchors
        let vault = KeyVaultBuilder::new()
            .with_shared(h.backend.clone() as Arc<dyn checkpoint_keystore::KeyMaterialBackend>)
            .build();
        let restarted = KeyManager::new(h.anchors.clone() as Arc<dyn TrustAnchorStore>, Arc::new(vault));

        let retired = restarted.retire_unregistered_anchors().await.unwrap();
        assert_eq!(retired, vec!["k1"]);
        assert_eq!(h.anchors.get("k1").await.unwrap().unwrap().status, KeyStatus::Inactive);
        assert!(h.anchors.get_trusted_keys(Utc::now()).await.unwrap().is_empty());

        // Same material re-registers against the existing anchor
        let key = kp.to_signing_key("mem:k1", Utc::now() - chrono::Duration::minutes(1));
        restarted.register_key(key).await.unwrap();
        assert_eq!(h.anchors.get("k1").await.unwrap().unwrap().status, KeyStatus::Pending);
        assert_eq!(h.anchors.history().await.unwrap().len(), 2);
        restarted.activate_key("k1", OverlapWindow::Immediate).await.unwrap();

        // Different material under a known ID, or a revoked ID, is refused
        let other = KeyPair::generate(Algorithm::HmacSha256, "k2").unwrap();
        assert!(matches!(
            restarted.register_key(other.to_signing_key("mem:k2", Utc::now())).await,
            Err(CheckpointError::InvalidTransition { .. })
        ));
        let k3 = KeyPair::generate(Algorithm::Ed25519, "k3").unwrap();
        h.anchors
            .add(k3.to_signing_key("mem:k3", Utc::now()).to_trust_anchor(Utc::now()))
            .await
            .unwrap();
        let impostor = KeyPair::generate(Algorithm::Ed25519, "k3").unwrap();
        assert!(matches!(
            restarted.register_key(impostor.to_signing_key("mem:k3", Utc::now())).await,
            Err(CheckpointError::DuplicateKey(_))
        ));
    }

    #[tokio::test]
    async fn test_first_activation() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;

        let outcome = h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();
        assert_eq!(outcome.previous, None);
        assert_eq!(h.manager.primary_key_id().unwrap().as_deref(), Some("k1"));
        assert_eq!(h.manager.active_key_count().unwrap(), 1);
        assert_eq!(h.anchors.get("k1").await.unwrap().unwrap().status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn test_rotation_overlap_by_checkpoints() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;
        register(&h, "k2", Algorithm::Dilithium2).await;

        h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();
        h.manager.note_committed(1);

        let outcome = h
            .manager
            .activate_key("k2", OverlapWindow::Checkpoints(2))
            .await
            .unwrap();
        assert_eq!(outcome.previous.as_deref(), Some("k1"));
        assert_eq!(outcome.overlap_until, Some(OverlapEnd::AfterVersion(3)));

        let k1 = h.manager.get_key("k1").unwrap().unwrap();
        assert_eq!(k1.status, KeyStatus::Retiring);
        assert_eq!(k1.superseded_by.as_deref(), Some("k2"));

        // v2: primary plus retiring key
        let set = h.manager.signing_set(2, Utc::now()).await.unwrap();
        assert_eq!(set.key_ids(), vec!["k2", "k1"]);

        // v3: overlap over, k1 demoted
        let set = h.manager.signing_set(3, Utc::now()).await.unwrap();
        assert_eq!(set.key_ids(), vec!["k2"]);
        assert_eq!(h.manager.get_key("k1").unwrap().unwrap().status, KeyStatus::Inactive);
        assert_eq!(h.anchors.get("k1").await.unwrap().unwrap().status, KeyStatus::Inactive);

        // Exactly one active key throughout
        assert_eq!(h.manager.active_key_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_overlap_leaves_table_usable() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;
        register(&h, "k2", Algorithm::Ed25519).await;
        h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();

        let huge = chrono::Duration::try_days(100_000_000).unwrap();
        let result = h.manager.activate_key("k2", OverlapWindow::Duration(huge)).await;
        assert!(matches!(result, Err(CheckpointError::ConfigError(_))));

        // Nothing changed and the table is still readable and writable
        assert_eq!(h.manager.list_keys().unwrap().len(), 2);
        assert_eq!(h.manager.primary_key_id().unwrap().as_deref(), Some("k1"));
        assert_eq!(h.manager.get_key("k2").unwrap().unwrap().status, KeyStatus::Pending);
        assert_eq!(h.manager.signing_set(1, Utc::now()).await.unwrap().key_ids(), vec!["k1"]);

        h.manager
            .activate_key("k2", OverlapWindow::Duration(chrono::Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(h.manager.primary_key_id().unwrap().as_deref(), Some("k2"));
    }

    #[tokio::test]
    async fn test_self_test_failure_aborts_swap() {
        let h = harness();
        register(&h, "k1", Algorithm::Ed25519).await;
        h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();

        // Registered public key does not match the stored secret
        let real = KeyPair::generate(Algorithm::Ed25519, "k2").unwrap();
        let impostor = KeyPair::generate(Algorithm::Ed25519, "k2").unwrap();
        h.backend.insert_key_pair(&impostor).unwrap();
        h.manager
            .register_key(real.to_signing_key("mem:k2", Utc::now() - chrono::Duration::minutes(1)))
            .await
            .unwrap();

        let result = h.manager.activate_key("k2", OverlapWindow::Immediate).await;
        assert!(matches!(result, Err(CheckpointError::SigningError(_))));

        assert_eq!(h.manager.primary_key_id().unwrap().as_deref(), Some("k1"));
        assert_eq!(h.manager.get_key("k2").unwrap().unwrap().status, KeyStatus::Pending);
        assert_eq!(h.manager.get_key("k1").unwrap().unwrap().status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn test_missing_material_aborts_swap() {
        let h = harness();
        let kp = KeyPair::generate(Algorithm::HmacSha256, "k1").unwrap();
        h.manager
            .register_key(kp.to_signing_key("mem:k1", Utc::now() - chrono::Duration::minutes(1)))
            .await
            .unwrap();

        let result = h.manager.activate_key("k1", OverlapWindow::Immediate).await;
        assert!(matches!(result, Err(CheckpointError::SigningError(_))));
        assert!(h.manager.primary_key_id().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoking_last_active_key_escalates() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;
        register(&h, "k2", Algorithm::HmacSha256).await;
        h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();

        // Revoking a pending key does not escalate
        let outcome = h.manager.revoke_key("k2", "unused", "ops").await.unwrap();
        assert!(!outcome.escalated);
        assert!(!outcome.was_primary);

        let outcome = h.manager.revoke_key("k1", "leaked", "ops").await.unwrap();
        assert!(outcome.escalated);
        assert!(outcome.was_primary);
        assert_eq!(outcome.record.reason, "leaked");
        assert!(h.manager.primary_key_id().unwrap().is_none());

        let result = h.manager.signing_set(1, Utc::now()).await;
        assert!(matches!(result, Err(CheckpointError::SigningError(_))));
    }

    #[tokio::test]
    async fn test_revocation_is_terminal() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;
        h.manager.revoke_key("k1", "leaked", "ops").await.unwrap();

        assert!(matches!(
            h.manager.activate_key("k1", OverlapWindow::Immediate).await,
            Err(CheckpointError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.manager.revoke_key("k1", "again", "ops").await,
            Err(CheckpointError::InvalidTransition { .. })
        ));
        assert!(h.manager.is_revoked("k1").unwrap());
        assert!(h.anchors.get("k1").await.unwrap().unwrap().is_revoked());
    }

    #[tokio::test]
    async fn test_revoked_retiring_key_leaves_signing_set() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;
        register(&h, "k2", Algorithm::Ed25519).await;
        h.manager.activate_key("k1", OverlapWindow::Immediate).await.unwrap();
        h.manager
            .activate_key("k2", OverlapWindow::Checkpoints(5))
            .await
            .unwrap();

        assert_eq!(h.manager.signing_set(1, Utc::now()).await.unwrap().key_ids(), vec!["k2", "k1"]);

        let outcome = h.manager.revoke_key("k1", "leaked", "ops").await.unwrap();
        assert!(!outcome.escalated);
        assert_eq!(h.manager.signing_set(1, Utc::now()).await.unwrap().key_ids(), vec!["k2"]);
    }

    #[tokio::test]
    async fn test_pending_keys_by_algorithm() {
        let h = harness();
        register(&h, "h1", Algorithm::HmacSha256).await;
        register(&h, "e1", Algorithm::Ed25519).await;

        let pending = h.manager.pending_keys(Algorithm::HmacSha256).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key_id, "h1");
    }
}
