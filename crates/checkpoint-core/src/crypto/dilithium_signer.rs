//! CRYSTALS-Dilithium2 signer
//!
//! Detached signatures only; the message is the 32-byte checkpoint digest.

use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};

use super::{SecretKeyMaterial, SignerProvider};
use crate::error::{CheckpointError, Result};
use crate::types::Algorithm;

/// Dilithium2 provider
#[derive(Debug, Clone, Copy, Default)]
pub struct Dilithium2Signer;

impl Dilithium2Signer {
    /// Public key length in bytes
    pub fn public_key_len() -> usize {
        dilithium2::public_key_bytes()
    }

    /// Signature length in bytes
    pub fn signature_len() -> usize {
        dilithium2::signature_bytes()
    }
}

impl SignerProvider for Dilithium2Signer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Dilithium2
    }

    fn sign(&self, message: &[u8], secret: &SecretKeyMaterial) -> Result<Vec<u8>> {
        let secret_key = dilithium2::SecretKey::from_bytes(secret.expose()).map_err(|e| {
            CheckpointError::CryptoError(format!("Invalid Dilithium2 secret key: {:?}", e))
        })?;
        let signature = dilithium2::detached_sign(message, &secret_key);
        Ok(signature.as_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(public_key) = dilithium2::PublicKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(signature) = dilithium2::DetachedSignature::from_bytes(signature) else {
            return false;
        };
        dilithium2::verify_detached_signature(&signature, message, &public_key).is_ok()
    }

    fn generate(&self) -> Result<(SecretKeyMaterial, Vec<u8>)> {
        let (public_key, secret_key) = dilithium2::keypair();
        Ok((
            SecretKeyMaterial::new(secret_key.as_bytes().to_vec()),
            public_key.as_bytes().to_vec(),
        ))
    }
}
