//! Server test utilities.

use super::fixtures::MultipartBody;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use parcel_core::config::StorageServiceConfig;
use parcel_server::{AppState, create_router};
use parcel_storage::BlobStore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    root: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary filesystem storage.
    pub async fn new() -> Self {
        Self::with_config(|_, _| {}).await
    }

    /// Create a test server with custom config modifications.
    ///
    /// The modifier receives the storage root so extra containers can be
    /// placed next to the write container.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut StorageServiceConfig, &Path),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let root = temp_dir.path().join("storage");

        let mut config = StorageServiceConfig::for_testing(&root);
        modifier(&mut config, &root);

        let store = BlobStore::from_config(&config.storage)
            .await
            .expect("Failed to create blob store");
        let state = AppState::new(config, Arc::new(store));
        let router = create_router(state.clone());

        Self {
            router,
            state,
            root,
            _temp_dir: temp_dir,
        }
    }

    /// Storage root shared by all containers of this server.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Send a request and return status and body bytes.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// Send a request and parse the body as JSON (`Null` if empty or invalid).
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// POST a multipart body to `uri` with the given size and digest headers.
    pub async fn upload_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        size: Option<&str>,
        sha256: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", MultipartBody::content_type());
        if let Some(size) = size {
            builder = builder.header("x-file-size", size);
        }
        if let Some(sha256) = sha256 {
            builder = builder.header("x-file-sha256", sha256);
        }
        self.send_json(builder.body(Body::from(body)).unwrap()).await
    }

    /// Upload `data` as the `uploaded` part.
    pub async fn upload(&self, uri: &str, data: &[u8], sha256: Option<&str>) -> (StatusCode, Value) {
        let size = data.len().to_string();
        let body = MultipartBody::new().upload(data).finish();
        self.upload_raw(uri, body, Some(&size), sha256).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        self.send_json(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> StatusCode {
        self.send(Request::delete(uri).body(Body::empty()).unwrap())
            .await
            .0
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_json(request).await
    }
}
