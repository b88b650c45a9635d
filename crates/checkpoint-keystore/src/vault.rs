//! Key vault - routes key references to material backends

use async_trait::async_trait;
use checkpoint_core::SigningMaterial;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{KeyStoreError, Result};
use crate::types::{KeyRef, KeyScheme};

/// Trait for key material backends
///
/// Each backend serves one key reference scheme and hands back material
/// ready for signing. HSM-backed backends return a remote signing handle
/// instead of private bytes.
#[async_trait]
pub trait KeyMaterialBackend: Send + Sync {
    /// Scheme served by this backend
    fn scheme(&self) -> KeyScheme;

    /// Fetch signing material for a locator
    ///
    /// # Arguments
    /// * `locator` - The part of the key reference after `scheme:`
    ///
    /// # Returns
    /// * `Ok(SigningMaterial)` - Local secret or remote handle
    /// * `Err(KeyStoreError)` - If the material is missing or the backend is down
    async fn retrieve_signing_material(&self, locator: &str) -> Result<SigningMaterial>;

    /// Get a description of this backend (for logging)
    fn description(&self) -> &str {
        "key material backend"
    }
}

/// Key vault - routes key references to backends
pub struct KeyVault {
    backends: HashMap<KeyScheme, Arc<dyn KeyMaterialBackend>>,
}

impl KeyVault {
    /// Create a new empty vault
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend, replacing any previous backend for its scheme
    pub fn register_backend<B: KeyMaterialBackend + 'static>(&mut self, backend: B) {
        self.register_shared(Arc::new(backend));
    }

    /// Register a backend that is also held elsewhere
    pub fn register_shared(&mut self, backend: Arc<dyn KeyMaterialBackend>) {
        let scheme = backend.scheme();
        info!(
            scheme = %scheme,
            description = backend.description(),
            "Registered key material backend"
        );
        self.backends.insert(scheme, backend);
    }

    /// Check if a backend is registered for a scheme
    pub fn has_backend(&self, scheme: KeyScheme) -> bool {
        self.backends.contains_key(&scheme)
    }

    /// List all registered schemes
    pub fn registered_schemes(&self) -> Vec<KeyScheme> {
        self.backends.keys().copied().collect()
    }

    /// Retrieve signing material for a `scheme:locator` key reference
    pub async fn retrieve_signing_material(&self, key_ref: &str) -> Result<SigningMaterial> {
        let parsed = KeyRef::parse(key_ref)?;

        let backend = self.backends.get(&parsed.scheme).ok_or_else(|| {
            warn!(scheme = %parsed.scheme, "No backend for key reference scheme");
            KeyStoreError::UnsupportedScheme(parsed.scheme.to_string())
        })?;

        let result = backend.retrieve_signing_material(&parsed.locator).await;

        match &result {
            Ok(material) => {
                debug!(
                    key_ref = %parsed,
                    remote = material.is_remote(),
                    "Signing material retrieved"
                );
            }
            Err(e) => {
                warn!(key_ref = %parsed, error = %e, "Signing material retrieval failed");
            }
        }

        result
    }
}

impl Default for KeyVault {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("schemes", &self.registered_schemes())
            .finish()
    }
}

/// Builder for creating a KeyVault with backends
pub struct KeyVaultBuilder {
    vault: KeyVault,
}

impl KeyVaultBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            vault: KeyVault::new(),
        }
    }

    /// Add a backend
    pub fn with_backend<B: KeyMaterialBackend + 'static>(mut self, backend: B) -> Self {
        self.vault.register_backend(backend);
        self
    }

    /// Add a shared backend
    pub fn with_shared(mut self, backend: Arc<dyn KeyMaterialBackend>) -> Self {
        self.vault.register_shared(backend);
        self
    }

    /// Build the vault
    pub fn build(self) -> KeyVault {
        self.vault
    }
}

impl Default for KeyVaultBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_core::SecretKeyMaterial;

    struct FixedBackend {
        scheme: KeyScheme,
    }

    #[async_trait]
    impl KeyMaterialBackend for FixedBackend {
        fn scheme(&self) -> KeyScheme {
            self.scheme
        }

        async fn retrieve_signing_material(&self, locator: &str) -> Result<SigningMaterial> {
            if locator == "missing" {
                return Err(KeyStoreError::KeyNotFound(locator.to_string()));
            }
            Ok(SigningMaterial::Secret(SecretKeyMaterial::new(
                locator.as_bytes().to_vec(),
            )))
        }

        fn description(&self) -> &str {
            "fixed backend"
        }
    }

    #[test]
    fn test_registration() {
        let vault = KeyVaultBuilder::new()
            .with_backend(FixedBackend {
                scheme: KeyScheme::Mem,
            })
            .build();

        assert!(vault.has_backend(KeyScheme::Mem));
        assert!(!vault.has_backend(KeyScheme::Hsm));
        assert_eq!(vault.registered_schemes(), vec![KeyScheme::Mem]);
    }

    #[tokio::test]
    async fn test_routes_by_scheme() {
        let vault = KeyVaultBuilder::new()
            .with_backend(FixedBackend {
                scheme: KeyScheme::Mem,
            })
            .build();

        match vault.retrieve_signing_material("mem:abc").await.unwrap() {
            SigningMaterial::Secret(secret) => assert_eq!(secret.expose(), b"abc"),
            other => panic!("unexpected material: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_backend() {
        let vault = KeyVault::new();
        let result = vault.retrieve_signing_material("hsm:slot-1").await;
        assert!(matches!(result, Err(KeyStoreError::UnsupportedScheme(_))));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let vault = KeyVaultBuilder::new()
            .with_backend(FixedBackend {
                scheme: KeyScheme::Mem,
            })
            .build();

        let result = vault.retrieve_signing_material("mem:missing").await;
        assert!(matches!(result, Err(KeyStoreError::KeyNotFound(_))));
    }
}
