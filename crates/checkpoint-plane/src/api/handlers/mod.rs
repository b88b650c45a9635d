//! API request handlers

pub mod anchors;
pub mod checkpoints;
pub mod keys;

use std::sync::Arc;

use crate::config::PlaneConfig;
use crate::core::{CheckpointService, CheckpointVerifier};

pub use anchors::{get_manifest, list_revocations, list_trust_anchors, ListAnchorsResponse, ListRevocationsResponse};
pub use checkpoints::{
    create_checkpoint, get_checkpoint, list_checkpoints, verify_checkpoint, ListCheckpointsResponse,
    VerifyCheckpointRequest,
};
pub use keys::{
    activate_key, list_keys, register_key, report_compromise, ActivateKeyRequest, ActivateKeyResponse,
    CompromiseRequest, CompromiseResponse, KeySummary, ListKeysResponse, RegisterKeyRequest,
};

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Checkpoint creation, storage and key lifecycle
    pub service: Arc<CheckpointService>,
    /// Verifier used before serving stored checkpoints
    pub verifier: CheckpointVerifier,
    /// Service configuration
    pub config: PlaneConfig,
}
