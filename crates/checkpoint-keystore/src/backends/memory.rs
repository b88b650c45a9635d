//! In-memory key material backend
//!
//! For tests and the demo binary; secrets live in process memory and are
//! zeroized when removed.

use async_trait::async_trait;
use checkpoint_core::{KeyPair, SecretKeyMaterial, SigningMaterial};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::error::{KeyStoreError, Result};
use crate::types::KeyScheme;
use crate::vault::KeyMaterialBackend;

/// In-memory backend serving `mem:` references
#[derive(Default)]
pub struct MemoryBackend {
    secrets: RwLock<HashMap<String, SecretKeyMaterial>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Store secret material under a locator
    pub fn insert(&self, locator: impl Into<String>, secret: SecretKeyMaterial) -> Result<()> {
        let locator = locator.into();
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| KeyStoreError::Internal("memory backend lock poisoned".into()))?;
        debug!(locator = %locator, "Stored key material");
        secrets.insert(locator, secret);
        Ok(())
    }

    /// Store a key pair's secret under its key ID
    pub fn insert_key_pair(&self, key_pair: &KeyPair) -> Result<()> {
        self.insert(key_pair.key_id(), key_pair.secret().clone())
    }

    /// Drop material for a locator
    pub fn remove(&self, locator: &str) -> Result<bool> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| KeyStoreError::Internal("memory backend lock poisoned".into()))?;
        Ok(secrets.remove(locator).is_some())
    }
}

#[async_trait]
impl KeyMaterialBackend for MemoryBackend {
    fn scheme(&self) -> KeyScheme {
        KeyScheme::Mem
    }

    fn description(&self) -> &str {
        "in-memory key material"
    }

    async fn retrieve_signing_material(&self, locator: &str) -> Result<SigningMaterial> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| KeyStoreError::Internal("memory backend lock poisoned".into()))?;

        secrets
            .get(locator)
            .cloned()
            .map(SigningMaterial::Secret)
            .ok_or_else(|| KeyStoreError::KeyNotFound(locator.to_string()))
    }
}
