//! File key material backend
//!
//! Serves `file:` references from a key directory. Each file holds the
//! base64-encoded secret. Locators are plain file names; path separators and
//! parent components are rejected.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use checkpoint_core::{SecretKeyMaterial, SigningMaterial};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{KeyStoreError, Result};
use crate::types::KeyScheme;
use crate::vault::KeyMaterialBackend;

/// Backend reading base64 secrets from a directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Serve keys from `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Key directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator);
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(relative)),
            _ => Err(KeyStoreError::InvalidKeyRef(format!(
                "file locator must be a plain file name: '{}'",
                locator
            ))),
        }
    }
}

#[async_trait]
impl KeyMaterialBackend for FileBackend {
    fn scheme(&self) -> KeyScheme {
        KeyScheme::File
    }

    fn description(&self) -> &str {
        "base64 key files"
    }

    async fn retrieve_signing_material(&self, locator: &str) -> Result<SigningMaterial> {
        let path = self.resolve(locator)?;

        let encoded = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Zeroizing::new(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeyStoreError::KeyNotFound(locator.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let secret = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyStoreError::InvalidMaterial {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;

        if secret.is_empty() {
            return Err(KeyStoreError::InvalidMaterial {
                locator: locator.to_string(),
                reason: "empty key file".into(),
            });
        }

        debug!(path = %path.display(), "Loaded key file");
        Ok(SigningMaterial::Secret(SecretKeyMaterial::new(secret)))
    }
}
