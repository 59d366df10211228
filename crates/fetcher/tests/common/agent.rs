//! Fetcher agent test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parcel_core::config::{FetcherConfig, RetryConfig};
use parcel_fetcher::{AppState, Fetcher, Readiness, create_router};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// An address nothing listens on.
#[allow(dead_code)]
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1";

/// Config rooted in `root` with fast specialize retries and unreachable peers.
#[allow(dead_code)]
pub fn test_config(root: &Path) -> FetcherConfig {
    FetcherConfig {
        shared_volume_path: root.join("userfunc"),
        secret_dir: root.join("secrets"),
        config_dir: root.join("configs"),
        resource_api_url: UNREACHABLE_URL.to_string(),
        runtime_url: UNREACHABLE_URL.to_string(),
        default_registry_url: UNREACHABLE_URL.to_string(),
        specialize: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        },
        ..FetcherConfig::default()
    }
}

/// A fetcher router over a temporary sandbox.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestAgent {
    pub router: axum::Router,
    pub state: AppState,
    root: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestAgent {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut FetcherConfig),
    {
        Self::build(modifier, |fetcher| fetcher, Readiness::ready()).await
    }

    /// Full control over config, fetcher wiring and readiness.
    pub async fn build<F, G>(modifier: F, wire: G, readiness: Readiness) -> Self
    where
        F: FnOnce(&mut FetcherConfig),
        G: FnOnce(Fetcher) -> Fetcher,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();

        let mut config = test_config(&root);
        modifier(&mut config);

        let fetcher = wire(Fetcher::from_config(&config));
        fetcher
            .create_dirs()
            .await
            .expect("Failed to create sandbox directories");
        let state = AppState::new(Arc::new(fetcher), readiness);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            root,
            _temp_dir: temp_dir,
        }
    }

    pub fn shared(&self) -> PathBuf {
        self.root.join("userfunc")
    }

    pub fn secrets(&self) -> PathBuf {
        self.root.join("secrets")
    }

    pub fn configs(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Send a request and parse the body as JSON (`Null` if empty or invalid).
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_json(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send_json(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }
}
