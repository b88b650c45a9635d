//! Pluggable signature algorithms
//!
//! Every algorithm implements `SignerProvider`. The provider is selected by the
//! `Algorithm` tag carried on each signature and trust anchor, never by a
//! process-wide default, so historical signatures stay verifiable after the
//! default changes.
//!
//! Providers:
//! - `HmacSigner`: HMAC-SHA256, constant-time verification
//! - `Ed25519Signer`: Ed25519 via `ed25519-dalek`
//! - `Dilithium2Signer`: CRYSTALS-Dilithium2 via `pqcrypto-dilithium`
//!
//! Private key material enters this module either as `SecretKeyMaterial`
//! (zeroized on drop) or as a `RemoteSigner` handle for HSM-backed keys, in
//! which case the private bytes never reach this process.

mod dilithium_signer;
mod ed25519_signer;
mod hmac_signer;

pub use self::dilithium_signer::Dilithium2Signer;
pub use self::ed25519_signer::Ed25519Signer;
pub use self::hmac_signer::HmacSigner;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::checkpoint::Signature;
use crate::error::{CheckpointError, Result};
use crate::key::SigningKey;
use crate::types::Algorithm;

/// Algorithm-specific sign/verify
pub trait SignerProvider: Send + Sync {
    /// Algorithm implemented by this provider
    fn algorithm(&self) -> Algorithm;

    /// Sign a message with local secret key material
    fn sign(&self, message: &[u8], secret: &SecretKeyMaterial) -> Result<Vec<u8>>;

    /// Verify a signature
    ///
    /// Malformed keys or signatures yield `false`, never an error.
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool;

    /// Generate a fresh key pair as `(secret, verification material)`
    ///
    /// Production keys are generated offline; this exists for tests and
    /// offline tooling.
    fn generate(&self) -> Result<(SecretKeyMaterial, Vec<u8>)>;
}

static HMAC_SIGNER: HmacSigner = HmacSigner;
static ED25519_SIGNER: Ed25519Signer = Ed25519Signer;
static DILITHIUM2_SIGNER: Dilithium2Signer = Dilithium2Signer;

/// Look up the provider for an algorithm tag
pub fn provider_for(algorithm: Algorithm) -> &'static dyn SignerProvider {
    match algorithm {
        Algorithm::HmacSha256 => &HMAC_SIGNER,
        Algorithm::Ed25519 => &ED25519_SIGNER,
        Algorithm::Dilithium2 => &DILITHIUM2_SIGNER,
    }
}

/// Verify a tagged signature against verification material
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &[u8]) -> bool {
    provider_for(signature.algorithm).verify(message, &signature.signature_bytes, public_key)
}

/// Secret key bytes, zeroized on drop
#[derive(Clone)]
pub struct SecretKeyMaterial(Zeroizing<Vec<u8>>);

impl SecretKeyMaterial {
    /// Wrap raw secret bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the secret bytes
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// Length of the secret
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretKeyMaterial").field(&"[redacted]").finish()
    }
}

/// Signing handle for keys whose private material lives in an HSM
pub trait RemoteSigner: Send + Sync {
    /// Algorithm the remote key implements
    fn algorithm(&self) -> Algorithm;

    /// Produce a signature over `message`
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Material retrieved from a key store for signing
#[derive(Clone)]
pub enum SigningMaterial {
    /// Local secret bytes
    Secret(SecretKeyMaterial),
    /// HSM-backed signing handle
    Remote(Arc<dyn RemoteSigner>),
}

impl SigningMaterial {
    /// Sign `message` with this material under `algorithm`
    pub fn sign(&self, algorithm: Algorithm, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            SigningMaterial::Secret(secret) => provider_for(algorithm).sign(message, secret),
            SigningMaterial::Remote(remote) => {
                if remote.algorithm() != algorithm {
                    return Err(CheckpointError::SigningError(format!(
                        "remote signer implements {}, key requires {}",
                        remote.algorithm(),
                        algorithm
                    )));
                }
                remote.sign(message)
            }
        }
    }

    /// Whether the material is held by an HSM
    pub fn is_remote(&self) -> bool {
        matches!(self, SigningMaterial::Remote(_))
    }
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningMaterial::Secret(_) => f.write_str("SigningMaterial::Secret([redacted])"),
            SigningMaterial::Remote(remote) => {
                write!(f, "SigningMaterial::Remote({})", remote.algorithm())
            }
        }
    }
}

/// A locally held key pair
///
/// Used by tests and offline tooling; the checkpoint service itself fetches
/// signing material through the key store.
#[derive(Clone)]
pub struct KeyPair {
    key_id: String,
    algorithm: Algorithm,
    secret: SecretKeyMaterial,
    public_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(algorithm: Algorithm, key_id: impl Into<String>) -> Result<Self> {
        let (secret, public_key) = provider_for(algorithm).generate()?;
        Ok(Self {
            key_id: key_id.into(),
            algorithm,
            secret,
            public_key,
        })
    }

    /// Assemble a key pair from existing material
    pub fn from_parts(
        algorithm: Algorithm,
        key_id: impl Into<String>,
        secret: SecretKeyMaterial,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            secret,
            public_key,
        }
    }

    /// Key identifier
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verification material (the shared secret for HMAC)
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Secret material
    pub fn secret(&self) -> &SecretKeyMaterial {
        &self.secret
    }

    /// Secret material wrapped for signing
    pub fn signing_material(&self) -> SigningMaterial {
        SigningMaterial::Secret(self.secret.clone())
    }

    /// Sign a message and tag the result
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let signature_bytes = provider_for(self.algorithm).sign(message, &self.secret)?;
        Ok(Signature {
            algorithm: self.algorithm,
            signer_key_id: self.key_id.clone(),
            signature_bytes,
            created_at: Utc::now(),
        })
    }

    /// Verify a signature with this pair's verification material
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        signature.algorithm == self.algorithm && verify_signature(message, signature, &self.public_key)
    }

    /// Describe this pair as a `pending` signing key
    pub fn to_signing_key(&self, key_ref: impl Into<String>, valid_from: DateTime<Utc>) -> SigningKey {
        SigningKey::pending(
            self.key_id.clone(),
            self.algorithm,
            key_ref,
            self.public_key.clone(),
            valid_from,
        )
    }
}
