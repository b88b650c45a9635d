//! Checkpoint Plane Server Binary
//!
//! Runs the checkpoint HTTP service. On start the binary generates a demo
//! HMAC signing key plus a pending fallback key in memory. Keys held in the
//! key directory or an HSM are registered through `POST /v1/keys`.

use std::error::Error;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use checkpoint_core::{Algorithm, KeyPair, OverlapWindow};
use checkpoint_keystore::backends::{FileBackend, MemoryBackend};
use checkpoint_keystore::{KeyMaterialBackend, KeyVaultBuilder};
use checkpoint_plane::{
    create_router, AlertSink, AppState, CheckpointService, CheckpointStore, CheckpointVerifier,
    FsAnchorStore, FsCheckpointStore, InMemoryRegistry, KeyManager, MemoryAnchorStore, MemoryCheckpointStore,
    PlaneConfig, RegistryStore, RevocationManager, TracingAlertSink, TrustAnchorStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = PlaneConfig::from_env()?;

    // Initialize logging
    let log_level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Key material backends
    let memory = Arc::new(MemoryBackend::new());
    let mut vault = KeyVaultBuilder::new().with_shared(memory.clone() as Arc<dyn KeyMaterialBackend>);
    if let Some(dir) = &config.key_dir {
        info!(dir = %dir.display(), "Serving file: key references");
        vault = vault.with_backend(FileBackend::new(dir.clone()));
    }
    let vault = Arc::new(vault.build());

    // Storage
    let (anchors, store): (Arc<dyn TrustAnchorStore>, Arc<dyn CheckpointStore>) = match &config.data_dir {
        Some(dir) => (
            Arc::new(FsAnchorStore::open(dir.clone()).await?),
            Arc::new(FsCheckpointStore::open(dir.clone()).await?),
        ),
        None => {
            warn!("CHECKPOINT_DATA_DIR not set; checkpoints and trust anchors are kept in memory");
            (Arc::new(MemoryAnchorStore::new()), Arc::new(MemoryCheckpointStore::new()))
        }
    };

    let alerts: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
    let keys = Arc::new(KeyManager::new(anchors.clone(), vault));
    let retired = keys.retire_unregistered_anchors().await?;
    if !retired.is_empty() {
        info!(count = retired.len(), "Keys from the previous run must be registered again before signing");
    }
    let revocation = Arc::new(RevocationManager::new(
        keys.clone(),
        alerts.clone(),
        config.fallback_algorithm,
    ));

    // Demo keys
    let valid_from = chrono::Utc::now() - chrono::Duration::seconds(1);
    let primary = KeyPair::generate(Algorithm::HmacSha256, format!("hmac-{}", uuid::Uuid::new_v4()))?;
    memory.insert_key_pair(&primary)?;
    keys.register_key(primary.to_signing_key(format!("mem:{}", primary.key_id()), valid_from))
        .await?;
    keys.activate_key(primary.key_id(), OverlapWindow::Immediate).await?;

    let fallback = KeyPair::generate(
        config.fallback_algorithm,
        format!("fallback-{}", uuid::Uuid::new_v4()),
    )?;
    memory.insert_key_pair(&fallback)?;
    keys.register_key(fallback.to_signing_key(format!("mem:{}", fallback.key_id()), valid_from))
        .await?;

    let registry: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistry::default());
    let service = Arc::new(
        CheckpointService::open(registry, keys, revocation, store, alerts.clone())
            .await?
            .with_budgets(config.budgets)
            .with_config_version(config.config_version.clone()),
    );
    let verifier = CheckpointVerifier::new(anchors, config.verifier, alerts);

    info!(
        primary_key = %primary.key_id(),
        fallback_key = %fallback.key_id(),
        fallback_algorithm = %config.fallback_algorithm,
        policy = %config.verifier.policy(),
        port = config.port,
        "Starting checkpoint plane"
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState {
        service,
        verifier,
        config,
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Checkpoint plane listening");

    axum::serve(listener, app).await?;
    Ok(())
}
