//! Signing key lifecycle and revocation

pub mod manager;
pub mod revocation;

pub use manager::{ActivationOutcome, KeyManager, RevocationOutcome, SigningSet};
pub use revocation::{CompromiseOutcome, RevocationManager, SafeModeStatus};
