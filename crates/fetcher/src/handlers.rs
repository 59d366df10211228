//! HTTP handlers for the fetcher agent.

use crate::error::{FetchError, FetchResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use parcel_core::{ArchiveUploadRequest, ArchiveUploadResponse, FetchRequest, SpecializeRequest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info};

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> FetchResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| FetchError::InvalidRequest(format!("invalid request body: {e}")))
}

/// Place an artifact in the shared volume.
pub async fn fetch(State(state): State<AppState>, body: Bytes) -> FetchResult<StatusCode> {
    let req: FetchRequest = parse_body(&body)?;
    info!(fetch_type = ?req.fetch_type, filename = %req.filename, "Fetch request received");

    state
        .fetcher
        .fetch_into_shared_volume(&req)
        .await
        .inspect_err(|e| error!(error = %e, "Fetch request failed"))?;
    Ok(StatusCode::OK)
}

/// Fetch and load a function into the runtime.
pub async fn specialize(State(state): State<AppState>, body: Bytes) -> FetchResult<StatusCode> {
    let req: SpecializeRequest = parse_body(&body)?;
    info!(function = %req.load_req.function_name, "Specialize request received");

    state
        .fetcher
        .specialize(&req)
        .await
        .inspect_err(|e| error!(error = %e, "Specialize request failed"))?;
    Ok(StatusCode::OK)
}

/// Archive a shared-volume entry and push it to a storage service.
pub async fn upload(
    State(state): State<AppState>,
    body: Bytes,
) -> FetchResult<Json<ArchiveUploadResponse>> {
    let req: ArchiveUploadRequest = parse_body(&body)?;
    info!(filename = %req.filename, archive = req.archive_package, "Upload request received");

    let response = state
        .fetcher
        .upload(&req)
        .await
        .inspect_err(|e| error!(error = %e, "Upload request failed"))?;
    Ok(Json(response))
}

#[derive(Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

pub async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// 503 until startup specialization has completed.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
