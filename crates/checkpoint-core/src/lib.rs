//! # Checkpoint Core
//!
//! Core types and cryptographic primitives for signed registry checkpoints.
//!
//! ## Key Concepts
//!
//! - **RegistrySnapshot**: ordered node records plus version and schema version
//! - **CheckpointBuilder**: canonical serialization and SHA-256 hashing of a snapshot
//! - **Checkpoint**: versioned, timestamped commitment carrying detached signatures
//! - **SignerProvider**: one implementation per algorithm (HMAC-SHA256, Ed25519, Dilithium2)
//! - **SigningKey / TrustAnchorEntry**: key lifecycle and the append-only record of trusted keys
//! - **TrustAnchorManifest**: signed publication of all trust anchors
//!
//! ## Invariants
//!
//! 1. **Determinism**: equal snapshots always produce equal canonical bytes and hashes
//! 2. **Agility**: every signature carries its algorithm tag; verification dispatches on it
//! 3. **Terminal revocation**: no key leaves the `revoked` state

pub mod checkpoint;
pub mod crypto;
pub mod error;
pub mod key;
pub mod manifest;
pub mod snapshot;
pub mod types;
pub mod verification;

pub use checkpoint::{checkpoint_digest, Checkpoint, CheckpointMeta, Signature};
pub use crypto::{provider_for, KeyPair, RemoteSigner, SecretKeyMaterial, SignerProvider, SigningMaterial};
pub use error::{CheckpointError, Result};
pub use key::{KeyStatus, OverlapEnd, OverlapWindow, RevocationRecord, SigningKey, TrustAnchorEntry};
pub use manifest::{ManifestAnchor, TrustAnchorManifest};
pub use snapshot::{CanonicalSnapshot, CheckpointBuilder};
pub use types::{Algorithm, NodeRecord, RegistrySnapshot};
pub use verification::{AcceptPolicy, VerificationFailure, VerificationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
