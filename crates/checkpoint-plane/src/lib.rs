//! Checkpoint Plane
//!
//! Service side of registry checkpointing:
//! - Signing key lifecycle (registration, self-tested activation, overlap, revocation)
//! - Append-only trust anchor store
//! - Single-writer checkpoint creation with per-algorithm latency budgets
//! - Checkpoint verification for replicas and auditors
//! - Safe mode after the last active key is revoked
//!
//! ## Rotation
//!
//! ```text
//! v1  signed by K1
//!     activate K2, overlap 2 checkpoints     K1: active -> retiring
//! v2  signed by K2 + K1
//! v3  signed by K2                           K1: retiring -> inactive
//! ```
//!
//! Inactive anchors are never deleted, so v1 and v2 keep verifying.
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness, primary key and safe-mode state
//! - `POST /v1/checkpoints` - Create the next checkpoint
//! - `GET /v1/checkpoints` - List stored versions
//! - `GET /v1/checkpoints/{version|latest}` - Fetch a verified checkpoint
//! - `POST /v1/checkpoints/verify` - Verify a caller-supplied checkpoint
//! - `GET /v1/trust-anchors` - List trust anchors
//! - `GET /v1/trust-anchors/manifest` - Signed trust anchor manifest
//! - `GET /v1/trust-anchors/revocations` - Revocation audit trail
//! - `GET /v1/keys` - List signing keys
//! - `POST /v1/keys` - Register an offline-generated key as pending
//! - `POST /v1/keys/{key_id}/activate` - Activate a pending key
//! - `POST /v1/keys/{key_id}/compromise` - Report a compromised key

pub mod alert;
pub mod api;
pub mod config;
pub mod core;
pub mod keys;
pub mod registry;
pub mod storage;

pub use alert::{Alert, AlertKind, AlertSink, RecordingAlertSink, TracingAlertSink};
pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{PlaneConfig, SigningBudgets, VerifierConfig};
pub use core::{ApplyOutcome, CheckpointService, CheckpointVerifier, LastKnownGood};
pub use keys::{KeyManager, RevocationManager, SafeModeStatus, SigningSet};
pub use registry::{InMemoryRegistry, RegistryStore};
pub use storage::{
    CheckpointSelector, CheckpointStore, FsAnchorStore, FsCheckpointStore, MemoryAnchorStore,
    MemoryCheckpointStore, StorageError, StoredCheckpoint, TrustAnchorStore,
};
