//! Key Store
//!
//! Resolves the key reference stored on each signing key (`mem:k1`,
//! `file:k1.key`, `hsm:slot-4`) into material the signer can use.
//!
//! ## Architecture
//!
//! A `KeyVault` holds one backend per reference scheme:
//!
//! - **Memory**: secrets held in process memory (tests, demo)
//! - **File**: base64 secrets in a key directory
//! - **HSM**: remote signing handles; private bytes never reach this process
//!
//! ## Usage
//!
//! ```ignore
//! use checkpoint_keystore::{KeyVaultBuilder, backends::*};
//!
//! let vault = KeyVaultBuilder::new()
//!     .with_backend(MemoryBackend::new())
//!     .with_backend(FileBackend::new("/etc/checkpoint/keys"))
//!     .build();
//!
//! let material = vault.retrieve_signing_material("file:k1.key").await?;
//! ```

pub mod backends;
pub mod error;
pub mod types;
pub mod vault;

pub use error::{KeyStoreError, Result};
pub use types::{KeyRef, KeyScheme};
pub use vault::{KeyMaterialBackend, KeyVault, KeyVaultBuilder};
