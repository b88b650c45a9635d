//! Checkpoint creation and verification

pub mod service;
pub mod verifier;

pub use service::CheckpointService;
pub use verifier::{ApplyOutcome, CheckpointVerifier, LastKnownGood};
