//! Compromise handling and safe mode
//!
//! When the last active key is revoked the plane enters safe mode: only the
//! configured fallback algorithm may sign until an operator restores a
//! replacement key. A pending fallback key is activated automatically when
//! one is registered; otherwise checkpoint signing stays halted.

use chrono::{DateTime, Utc};
use checkpoint_core::{Algorithm, CheckpointError, OverlapWindow, Result};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

use super::manager::{ActivationOutcome, KeyManager, RevocationOutcome};
use crate::alert::{Alert, AlertKind, AlertSink};

/// Current signing mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SafeModeStatus {
    Normal,
    SafeMode {
        /// Only algorithm allowed to sign
        fallback: Algorithm,
        since: DateTime<Utc>,
        /// Revoked key that triggered safe mode
        trigger_key_id: String,
        /// Fallback key now signing, if one was activated
        fallback_key_id: Option<String>,
    },
}

/// Result of handling a compromise report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompromiseOutcome {
    pub revocation: RevocationOutcome,
    pub safe_mode: bool,
    pub fallback_key_id: Option<String>,
}

/// Revocation front end with safe mode escalation
pub struct RevocationManager {
    keys: Arc<KeyManager>,
    alerts: Arc<dyn AlertSink>,
    fallback: Algorithm,
    state: RwLock<SafeModeStatus>,
}

impl std::fmt::Debug for RevocationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationManager")
            .field("fallback", &self.fallback)
            .field("status", &self.status().ok())
            .finish()
    }
}

impl RevocationManager {
    pub fn new(keys: Arc<KeyManager>, alerts: Arc<dyn AlertSink>, fallback: Algorithm) -> Self {
        Self {
            keys,
            alerts,
            fallback,
            state: RwLock::new(SafeModeStatus::Normal),
        }
    }

    /// Fallback algorithm used in safe mode
    pub fn fallback_algorithm(&self) -> Algorithm {
        self.fallback
    }

    /// Current mode
    pub fn status(&self) -> Result<SafeModeStatus> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| CheckpointError::PersistenceError("safe mode lock poisoned".into()))
    }

    /// Whether signing is restricted to the fallback algorithm
    pub fn is_safe_mode(&self) -> bool {
        matches!(self.status(), Ok(SafeModeStatus::SafeMode { .. }))
    }

    /// Algorithm every signer must use, if restricted
    pub fn signing_constraint(&self) -> Result<Option<Algorithm>> {
        Ok(match self.status()? {
            SafeModeStatus::Normal => None,
            SafeModeStatus::SafeMode { fallback, .. } => Some(fallback),
        })
    }

    fn set_status(&self, status: SafeModeStatus) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CheckpointError::PersistenceError("safe mode lock poisoned".into()))?;
        *state = status;
        Ok(())
    }

    /// Revoke a compromised key and escalate if nothing is left to sign with
    pub async fn handle_compromise(
        &self,
        key_id: &str,
        reason: &str,
        reported_by: &str,
    ) -> Result<CompromiseOutcome> {
        self.alerts.raise(
            Alert::new(AlertKind::KeyCompromised, format!("key compromise reported: {}", reason))
                .with_key(key_id),
        );

        let revocation = self.keys.revoke_key(key_id, reason, reported_by).await?;
        if !revocation.escalated {
            return Ok(CompromiseOutcome {
                revocation,
                safe_mode: self.is_safe_mode(),
                fallback_key_id: None,
            });
        }

        let escalation = CheckpointError::RevocationEscalation {
            key_id: key_id.to_string(),
        };
        error!(key_id = %key_id, fallback = %self.fallback, "{}", escalation);
        self.set_status(SafeModeStatus::SafeMode {
            fallback: self.fallback,
            since: Utc::now(),
            trigger_key_id: key_id.to_string(),
            fallback_key_id: None,
        })?;
        self.alerts
            .raise(Alert::new(AlertKind::SafeModeEntered, escalation.to_string()).with_key(key_id));

        let fallback_key_id = match self.keys.pending_keys(self.fallback)?.into_iter().next() {
            Some(candidate) => match self.activate_fallback(&candidate.key_id).await {
                Ok(outcome) => Some(outcome.key_id),
                Err(e) => {
                    warn!(key_id = %candidate.key_id, error = %e, "Fallback key activation failed");
                    None
                }
            },
            None => {
                warn!(
                    fallback = %self.fallback,
                    "No pending fallback key; checkpoint signing halted"
                );
                None
            }
        };

        Ok(CompromiseOutcome {
            revocation,
            safe_mode: true,
            fallback_key_id,
        })
    }

    /// Activate a fallback-algorithm key while in safe mode
    pub async fn activate_fallback(&self, key_id: &str) -> Result<ActivationOutcome> {
        if !self.is_safe_mode() {
            return Err(CheckpointError::ConfigError(
                "fallback keys are only activated in safe mode".into(),
            ));
        }
        let key = self
            .keys
            .get_key(key_id)?
            .ok_or_else(|| CheckpointError::UnknownKey(key_id.to_string()))?;
        if key.algorithm != self.fallback {
            return Err(CheckpointError::ConfigError(format!(
                "key '{}' uses {}, safe mode requires {}",
                key_id, key.algorithm, self.fallback
            )));
        }

        let outcome = self.keys.activate_key(key_id, OverlapWindow::Immediate).await?;

        let mut state = self
            .state
            .write()
            .map_err(|_| CheckpointError::PersistenceError("safe mode lock poisoned".into()))?;
        if let SafeModeStatus::SafeMode { fallback_key_id, .. } = &mut *state {
            *fallback_key_id = Some(key_id.to_string());
        }
        info!(key_id = %key_id, algorithm = %self.fallback, "Fallback key signing in safe mode");
        Ok(outcome)
    }

    /// Leave safe mode by activating a replacement key
    pub async fn restore(&self, replacement_key_id: &str, overlap: OverlapWindow) -> Result<ActivationOutcome> {
        if !self.is_safe_mode() {
            return Err(CheckpointError::ConfigError("not in safe mode".into()));
        }

        let outcome = self.keys.activate_key(replacement_key_id, overlap).await?;
        self.set_status(SafeModeStatus::Normal)?;

        self.alerts.raise(
            Alert::new(AlertKind::SafeModeExited, "replacement key active; normal signing resumed")
                .with_key(replacement_key_id),
        );
        info!(key_id = %replacement_key_id, "Safe mode exited");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlertSink;
    use crate::storage::{MemoryAnchorStore, TrustAnchorStore};
    use checkpoint_core::KeyPair;
    use checkpoint_keystore::backends::MemoryBackend;
    use checkpoint_keystore::{KeyMaterialBackend, KeyVaultBuilder};

    struct Harness {
        keys: Arc<KeyManager>,
        backend: Arc<MemoryBackend>,
        alerts: Arc<RecordingAlertSink>,
        revocation: RevocationManager,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let vault = KeyVaultBuilder::new()
            .with_shared(backend.clone() as Arc<dyn KeyMaterialBackend>)
            .build();
        let anchors: Arc<dyn TrustAnchorStore> = Arc::new(MemoryAnchorStore::new());
        let keys = Arc::new(KeyManager::new(anchors, Arc::new(vault)));
        let alerts = Arc::new(RecordingAlertSink::new());
        let revocation = RevocationManager::new(
            keys.clone(),
            alerts.clone() as Arc<dyn AlertSink>,
            Algorithm::HmacSha256,
        );
        Harness {
            keys,
            backend,
            alerts,
            revocation,
        }
    }

    async fn register(h: &Harness, key_id: &str, algorithm: Algorithm) {
        let kp = KeyPair::generate(algorithm, key_id).unwrap();
        h.backend.insert_key_pair(&kp).unwrap();
        h.keys
            .register_key(kp.to_signing_key(format!("mem:{}", key_id), Utc::now() - chrono::Duration::minutes(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_compromise_of_retiring_key_stays_normal() {
        let h = harness();
        register(&h, "k1", Algorithm::HmacSha256).await;
        register(&h, "k2", Algorithm::Dilithium2).await;
        h.keys.activate_key("k1", OverlapWindow::Immediate).await.unwrap();
        h.keys.activate_key("k2", OverlapWindow::Checkpoints(3)).await.unwrap();

        let outcome = h.revocation.handle_compromise("k1", "leaked", "ops").await.unwrap();
        assert!(!outcome.safe_mode);
        assert!(!outcome.revocation.escalated);
        assert_eq!(h.revocation.status().unwrap(), SafeModeStatus::Normal);
        assert_eq!(h.alerts.count(AlertKind::KeyCompromised), 1);
        assert_eq!(h.alerts.count(AlertKind::SafeModeEntered), 0);
    }

    #[tokio::test]
    async fn test_compromise_without_fallback_halts_signing() {
        let h = harness();
        register(&h, "k2", Algorithm::Dilithium2).await;
        h.keys.activate_key("k2", OverlapWindow::Immediate).await.unwrap();

        let outcome = h.revocation.handle_compromise("k2", "leaked", "ops").await.unwrap();
        assert!(outcome.safe_mode);
        assert_eq!(outcome.fallback_key_id, None);
        assert_eq!(h.revocation.signing_constraint().unwrap(), Some(Algorithm::HmacSha256));
        assert_eq!(h.alerts.count(AlertKind::SafeModeEntered), 1);

        let entered = h
            .alerts
            .alerts()
            .into_iter()
            .find(|a| a.kind == AlertKind::SafeModeEntered)
            .unwrap();
        assert_eq!(entered.key_id.as_deref(), Some("k2"));

        assert!(h.keys.signing_set(1, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_compromise_activates_pending_fallback() {
        let h = harness();
        register(&h, "k2", Algorithm::Dilithium2).await;
        register(&h, "fb", Algorithm::HmacSha256).await;
        h.keys.activate_key("k2", OverlapWindow::Immediate).await.unwrap();

        let outcome = h.revocation.handle_compromise("k2", "leaked", "ops").await.unwrap();
        assert_eq!(outcome.fallback_key_id.as_deref(), Some("fb"));
        assert_eq!(h.keys.primary_key_id().unwrap().as_deref(), Some("fb"));

        match h.revocation.status().unwrap() {
            SafeModeStatus::SafeMode {
                fallback_key_id,
                trigger_key_id,
                ..
            } => {
                assert_eq!(fallback_key_id.as_deref(), Some("fb"));
                assert_eq!(trigger_key_id, "k2");
            }
            other => panic!("expected safe mode, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_must_match_algorithm() {
        let h = harness();
        register(&h, "k2", Algorithm::Dilithium2).await;
        register(&h, "e1", Algorithm::Ed25519).await;
        h.keys.activate_key("k2", OverlapWindow::Immediate).await.unwrap();
        h.revocation.handle_compromise("k2", "leaked", "ops").await.unwrap();

        let result = h.revocation.activate_fallback("e1").await;
        assert!(matches!(result, Err(CheckpointError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_restore_exits_safe_mode() {
        let h = harness();
        register(&h, "k2", Algorithm::Dilithium2).await;
        register(&h, "k3", Algorithm::Dilithium2).await;
        h.keys.activate_key("k2", OverlapWindow::Immediate).await.unwrap();
        h.revocation.handle_compromise("k2", "leaked", "ops").await.unwrap();
        assert!(h.revocation.is_safe_mode());

        h.revocation.restore("k3", OverlapWindow::Immediate).await.unwrap();
        assert!(!h.revocation.is_safe_mode());
        assert_eq!(h.revocation.signing_constraint().unwrap(), None);
        assert_eq!(h.alerts.count(AlertKind::SafeModeExited), 1);
    }

    #[tokio::test]
    async fn test_fallback_outside_safe_mode_rejected() {
        let h = harness();
        register(&h, "fb", Algorithm::HmacSha256).await;
        assert!(matches!(
            h.revocation.activate_fallback("fb").await,
            Err(CheckpointError::ConfigError(_))
        ));
    }
}
