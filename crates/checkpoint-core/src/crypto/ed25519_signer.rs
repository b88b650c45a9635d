//! Ed25519 signer

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use super::{SecretKeyMaterial, SignerProvider};
use crate::error::{CheckpointError, Result};
use crate::types::Algorithm;

/// Ed25519 provider
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Signer;

impl SignerProvider for Ed25519Signer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Ed25519
    }

    fn sign(&self, message: &[u8], secret: &SecretKeyMaterial) -> Result<Vec<u8>> {
        let bytes: [u8; 32] = secret.expose().try_into().map_err(|_| {
            CheckpointError::CryptoError(format!(
                "Invalid Ed25519 secret length: expected 32, got {}",
                secret.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&bytes);
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(public_key) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    fn generate(&self) -> Result<(SecretKeyMaterial, Vec<u8>)> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes().to_vec();
        Ok((SecretKeyMaterial::new(signing_key.to_bytes().to_vec()), public))
    }
}
