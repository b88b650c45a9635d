//! HTTP API Tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use checkpoint_core::{Algorithm, KeyPair, NodeRecord, OverlapWindow};
use checkpoint_keystore::backends::{FileBackend, MemoryBackend};
use checkpoint_keystore::{KeyMaterialBackend, KeyVaultBuilder};
use checkpoint_plane::{
    create_router, AlertSink, AppState, CheckpointService, CheckpointStore, CheckpointVerifier, InMemoryRegistry,
    KeyManager, MemoryAnchorStore, MemoryCheckpointStore, PlaneConfig, RecordingAlertSink, RegistryStore,
    RevocationManager, TrustAnchorStore,
};

// =============================================================================
// Test Helpers
// =============================================================================

struct TestApp {
    state: Arc<AppState>,
    backend: Arc<MemoryBackend>,
}

impl TestApp {
    fn new() -> Self {
        Self::build(None)
    }

    /// App that also serves `file:` references from `key_dir`
    fn with_key_dir(key_dir: &std::path::Path) -> Self {
        Self::build(Some(key_dir))
    }

    fn build(key_dir: Option<&std::path::Path>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let mut vault = KeyVaultBuilder::new().with_shared(backend.clone() as Arc<dyn KeyMaterialBackend>);
        if let Some(dir) = key_dir {
            vault = vault.with_backend(FileBackend::new(dir));
        }
        let vault = vault.build();
        let anchors: Arc<dyn TrustAnchorStore> = Arc::new(MemoryAnchorStore::new());
        let keys = Arc::new(KeyManager::new(anchors.clone(), Arc::new(vault)));
        let alerts: Arc<dyn AlertSink> = Arc::new(RecordingAlertSink::new());
        let revocation = Arc::new(RevocationManager::new(keys.clone(), alerts.clone(), Algorithm::HmacSha256));

        let registry = Arc::new(InMemoryRegistry::new(1));
        registry.upsert(NodeRecord::new("node-a", "10.0.0.1:7000")).unwrap();

        let config = PlaneConfig::default();
        let service = Arc::new(CheckpointService::new(
            registry as Arc<dyn RegistryStore>,
            keys,
            revocation,
            Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
            alerts.clone(),
        ));
        let verifier = CheckpointVerifier::new(anchors, config.verifier, alerts);

        Self {
            state: Arc::new(AppState {
                service,
                verifier,
                config,
            }),
            backend,
        }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn add_key(&self, key_id: &str, algorithm: Algorithm) {
        let kp = KeyPair::generate(algorithm, key_id).unwrap();
        self.backend.insert_key_pair(&kp).unwrap();
        self.state
            .service
            .keys()
            .register_key(kp.to_signing_key(format!("mem:{}", key_id), Utc::now() - chrono::Duration::minutes(1)))
            .await
            .unwrap();
    }

    /// App with one active HMAC key
    async fn with_primary() -> Self {
        let app = Self::new();
        app.add_key("k1", Algorithm::HmacSha256).await;
        app.state
            .service
            .keys()
            .activate_key("k1", OverlapWindow::Immediate)
            .await
            .unwrap();
        app
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(self.router(), request).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(self.router(), request).await
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ready_reflects_primary_key() {
    let app = TestApp::new();
    let (_, body) = app.get("/ready").await;
    assert_eq!(body["ready"], false);
    assert_eq!(body["safe_mode"]["mode"], "normal");

    let app = TestApp::with_primary().await;
    let (status, body) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["primary_key_id"], "k1");
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn test_create_and_fetch_checkpoint() {
    let app = TestApp::with_primary().await;

    let (status, created) = app.post("/v1/checkpoints", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["checkpoint"]["version"], 1);
    assert_eq!(created["meta"]["signer_key_ids"], json!(["k1"]));

    let (status, latest) = app.get("/v1/checkpoints/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["checkpoint"], created["checkpoint"]);

    let (status, by_version) = app.get("/v1/checkpoints/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_version["snapshot"]["nodes"][0]["node_id"], "node-a");

    let (status, listing) = app.get("/v1/checkpoints").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["versions"], json!([1]));
    assert_eq!(listing["latest"], 1);
}

#[tokio::test]
async fn test_no_checkpoint_yet() {
    let app = TestApp::with_primary().await;
    let (status, body) = app.get("/v1/checkpoints/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NO_CHECKPOINT");
}

#[tokio::test]
async fn test_bad_selector() {
    let app = TestApp::with_primary().await;
    let (status, body) = app.get("/v1/checkpoints/newest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_create_without_key_unavailable() {
    let app = TestApp::new();
    let (status, body) = app.post("/v1/checkpoints", json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SIGNING_UNAVAILABLE");
}

#[tokio::test]
async fn test_verify_endpoint() {
    let app = TestApp::with_primary().await;
    let (_, created) = app.post("/v1/checkpoints", json!({})).await;

    let (status, report) = app
        .post(
            "/v1/checkpoints/verify",
            json!({ "checkpoint": created["checkpoint"], "snapshot": created["snapshot"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], true);
    assert_eq!(report["matched_key_ids"], json!(["k1"]));

    let mut tampered = created["snapshot"].clone();
    tampered["nodes"][0]["endpoint"] = json!("203.0.113.9:7000");
    let (status, report) = app
        .post(
            "/v1/checkpoints/verify",
            json!({ "checkpoint": created["checkpoint"], "snapshot": tampered }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], false);
    assert_eq!(report["reasons"][0]["kind"], "bad_hash");
}

// =============================================================================
// Trust Anchors
// =============================================================================

#[tokio::test]
async fn test_anchor_listing_hides_hmac_secret() {
    let app = TestApp::with_primary().await;
    app.add_key("pq", Algorithm::Dilithium2).await;

    let (status, body) = app.get("/v1/trust-anchors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let anchors = body["anchors"].as_array().unwrap();
    let hmac = anchors.iter().find(|a| a["key_id"] == "k1").unwrap();
    assert!(hmac.get("public_key").map_or(true, Value::is_null));
    assert!(hmac["fingerprint"].as_str().unwrap().len() == 64);

    let pq = anchors.iter().find(|a| a["key_id"] == "pq").unwrap();
    assert!(pq["public_key"].is_string());
}

#[tokio::test]
async fn test_manifest_signed_by_hmac_primary_is_plane_only() {
    let app = TestApp::with_primary().await;
    let (status, body) = app.get("/v1/trust-anchors/manifest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signature"]["signer_key_id"], "k1");
    assert_eq!(body["publicly_verifiable"], false);
    assert_eq!(body["anchors"].as_array().unwrap().len(), 1);
}

// =============================================================================
// Key Lifecycle
// =============================================================================

#[tokio::test]
async fn test_register_file_keys_via_api() {
    let dir = tempfile::tempdir().unwrap();
    let ed = KeyPair::generate(Algorithm::Ed25519, "ed").unwrap();
    let mac = KeyPair::generate(Algorithm::HmacSha256, "mac").unwrap();
    std::fs::write(dir.path().join("ed.key"), STANDARD.encode(ed.secret().expose())).unwrap();
    std::fs::write(dir.path().join("mac.key"), STANDARD.encode(mac.secret().expose())).unwrap();
    let app = TestApp::with_key_dir(dir.path());

    let (status, body) = app
        .post(
            "/v1/keys",
            json!({
                "key_id": "ed",
                "algorithm": "ed25519",
                "key_ref": "file:ed.key",
                "public_key": STANDARD.encode(ed.public_key()),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert!(body.get("public_key").is_none());

    // HMAC anchors come from the stored secret, never from the request
    let (status, _) = app
        .post(
            "/v1/keys",
            json!({ "key_id": "mac", "algorithm": "hmac-sha256", "key_ref": "file:mac.key" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let anchor = app.state.service.keys().anchors().get("mac").await.unwrap().unwrap();
    assert_eq!(anchor.public_key_material, mac.public_key());

    let rejected = [
        json!({ "key_id": "x1", "algorithm": "hmac-sha256", "key_ref": "file:mac.key", "public_key": "AAAA" }),
        json!({ "key_id": "x2", "algorithm": "hmac-sha256", "key_ref": "file:missing.key" }),
        json!({ "key_id": "x3", "algorithm": "ed25519", "key_ref": "file:ed.key" }),
        json!({ "key_id": "x4", "algorithm": "ed25519", "key_ref": "file:ed.key", "public_key": "not base64!" }),
        json!({ "key_id": "x5", "algorithm": "ed25519", "key_ref": "no-scheme", "public_key": "AAAA" }),
    ];
    for request in rejected {
        let (status, body) = app.post("/v1/keys", request.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", request);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    let (status, body) = app
        .post(
            "/v1/keys",
            json!({
                "key_id": "ed",
                "algorithm": "ed25519",
                "key_ref": "file:ed.key",
                "public_key": STANDARD.encode(ed.public_key()),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_KEY_STATE");

    // The registered file key activates and signs
    let (status, _) = app.post("/v1/keys/ed/activate", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, created) = app.post("/v1/checkpoints", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["meta"]["signer_key_ids"], json!(["ed"]));

    let (_, report) = app
        .post(
            "/v1/checkpoints/verify",
            json!({ "checkpoint": created["checkpoint"], "snapshot": created["snapshot"] }),
        )
        .await;
    assert_eq!(report["valid"], true);
}

#[tokio::test]
async fn test_activate_key_via_api() {
    let app = TestApp::with_primary().await;
    app.add_key("k2", Algorithm::Ed25519).await;

    let (status, body) = app
        .post("/v1/keys/k2/activate", json!({ "overlap_checkpoints": 2 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous"], "k1");
    assert_eq!(body["safe_mode"], false);

    let (_, keys) = app.get("/v1/keys").await;
    assert_eq!(keys["primary_key_id"], "k2");
    assert!(keys["keys"]
        .as_array()
        .unwrap()
        .iter()
        .all(|k| k.get("public_key").is_none()));

    let (status, body) = app.post("/v1/keys/k1/activate", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_KEY_STATE");

    let (status, _) = app.post("/v1/keys/missing/activate", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_activate_with_out_of_range_overlap() {
    let app = TestApp::with_primary().await;
    app.add_key("k2", Algorithm::Ed25519).await;

    for secs in [i64::MAX, 10_000_000_000_000] {
        let (status, body) = app
            .post("/v1/keys/k2/activate", json!({ "overlap_secs": secs }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    // The key table is intact and rotation still works
    let (status, keys) = app.get("/v1/keys").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(keys["primary_key_id"], "k1");

    let (status, body) = app
        .post("/v1/keys/k2/activate", json!({ "overlap_secs": 60 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous"], "k1");

    let (status, created) = app.post("/v1/checkpoints", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["meta"]["signer_key_ids"], json!(["k2", "k1"]));
}

#[tokio::test]
async fn test_compromise_enters_safe_mode() {
    let app = TestApp::with_primary().await;
    app.post("/v1/checkpoints", json!({})).await;

    let (status, body) = app
        .post(
            "/v1/keys/k1/compromise",
            json!({ "reason": "secret leaked", "reported_by": "security" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe_mode"], true);
    assert!(body["fallback_key_id"].is_null());

    let (status, body) = app.post("/v1/checkpoints", json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SAFE_MODE_UNAVAILABLE");

    let (_, revocations) = app.get("/v1/trust-anchors/revocations").await;
    assert_eq!(revocations["count"], 1);
    assert_eq!(revocations["revocations"][0]["key_id"], "k1");

    // Checkpoints signed only by the compromised key are no longer served
    let (status, body) = app.get("/v1/checkpoints/1").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VERIFICATION_FAILED");

    // Activating a fallback key resumes signing
    app.add_key("fb", Algorithm::HmacSha256).await;
    let (status, body) = app.post("/v1/keys/fb/activate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe_mode"], true);

    let (status, created) = app.post("/v1/checkpoints", json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["meta"]["safe_mode"], true);
}

#[tokio::test]
async fn test_compromise_requires_reason() {
    let app = TestApp::with_primary().await;
    let (status, _) = app
        .post("/v1/keys/k1/compromise", json!({ "reason": " ", "reported_by": "ops" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
