//! HSM key material backend
//!
//! Serves `hsm:` references. Slots map to `RemoteSigner` handles; the backend
//! never returns private bytes. `SoftHsmSigner` is an in-process stand-in used
//! by tests and the demo binary, with optional artificial latency.

use async_trait::async_trait;
use checkpoint_core::{Algorithm, CheckpointError, KeyPair, RemoteSigner, SigningMaterial};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{KeyStoreError, Result};
use crate::types::KeyScheme;
use crate::vault::KeyMaterialBackend;

/// Backend handing out remote signing handles by slot
pub struct HsmBackend {
    slots: RwLock<HashMap<String, Arc<dyn RemoteSigner>>>,
    available: AtomicBool,
}

impl HsmBackend {
    /// Create a backend with no slots
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Bind a signing handle to a slot
    pub fn bind_slot(&self, slot: impl Into<String>, signer: Arc<dyn RemoteSigner>) -> Result<()> {
        let slot = slot.into();
        let mut slots = self
            .slots
            .write()
            .map_err(|_| KeyStoreError::Internal("hsm slot table lock poisoned".into()))?;
        info!(slot = %slot, algorithm = %signer.algorithm(), "Bound HSM slot");
        slots.insert(slot, signer);
        Ok(())
    }

    /// Mark the device reachable or unreachable
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("HSM marked unavailable");
        }
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether the device is reachable
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

impl Default for HsmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyMaterialBackend for HsmBackend {
    fn scheme(&self) -> KeyScheme {
        KeyScheme::Hsm
    }

    fn description(&self) -> &str {
        "hsm signing handles"
    }

    async fn retrieve_signing_material(&self, locator: &str) -> Result<SigningMaterial> {
        if !self.is_available() {
            return Err(KeyStoreError::BackendUnavailable(format!(
                "hsm unreachable for slot {}",
                locator
            )));
        }

        let slots = self
            .slots
            .read()
            .map_err(|_| KeyStoreError::Internal("hsm slot table lock poisoned".into()))?;

        slots
            .get(locator)
            .cloned()
            .map(SigningMaterial::Remote)
            .ok_or_else(|| KeyStoreError::KeyNotFound(locator.to_string()))
    }
}

/// In-process signer that behaves like an HSM slot
pub struct SoftHsmSigner {
    key_pair: KeyPair,
    latency: Option<Duration>,
}

impl SoftHsmSigner {
    /// Wrap a key pair
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            latency: None,
        }
    }

    /// Delay every signature by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Verification material of the wrapped key
    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key()
    }
}

impl RemoteSigner for SoftHsmSigner {
    fn algorithm(&self) -> Algorithm {
        self.key_pair.algorithm()
    }

    fn sign(&self, message: &[u8]) -> checkpoint_core::Result<Vec<u8>> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        self.key_pair
            .sign(message)
            .map(|signature| signature.signature_bytes)
            .map_err(|e| CheckpointError::SigningError(format!("soft hsm: {}", e)))
    }
}
