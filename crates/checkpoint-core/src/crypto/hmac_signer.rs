//! HMAC-SHA256 signer

use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use super::{SecretKeyMaterial, SignerProvider};
use crate::error::{CheckpointError, Result};
use crate::types::Algorithm;

type HmacSha256 = Hmac<Sha256>;

/// Shortest shared secret accepted for signing
pub const MIN_HMAC_KEY_LEN: usize = 32;

/// HMAC-SHA256 provider
///
/// HMAC is symmetric: the verification material recorded in the trust anchor
/// is the shared secret itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSigner;

impl SignerProvider for HmacSigner {
    fn algorithm(&self) -> Algorithm {
        Algorithm::HmacSha256
    }

    fn sign(&self, message: &[u8], secret: &SecretKeyMaterial) -> Result<Vec<u8>> {
        if secret.len() < MIN_HMAC_KEY_LEN {
            return Err(CheckpointError::CryptoError(format!(
                "HMAC key too short: {} bytes, need at least {}",
                secret.len(),
                MIN_HMAC_KEY_LEN
            )));
        }

        let mut mac = HmacSha256::new_from_slice(secret.expose())
            .map_err(|e| CheckpointError::CryptoError(e.to_string()))?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        if public_key.is_empty() {
            return false;
        }
        let Ok(mut mac) = HmacSha256::new_from_slice(public_key) else {
            return false;
        };
        mac.update(message);
        // constant-time comparison
        mac.verify_slice(signature).is_ok()
    }

    fn generate(&self) -> Result<(SecretKeyMaterial, Vec<u8>)> {
        let mut secret = vec![0u8; MIN_HMAC_KEY_LEN];
        OsRng.fill_bytes(&mut secret);
        let verification = secret.clone();
        Ok((SecretKeyMaterial::new(secret), verification))
    }
}
