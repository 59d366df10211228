//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::http::StatusCode;
use parcel_core::sanitize_archive_id;
use serde::Deserialize;

/// `?id=` query shared by the archive, status and events endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

impl IdQuery {
    /// The requested archive id, reduced to its path basename.
    pub fn archive_id(&self) -> ApiResult<String> {
        let raw = self
            .id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("missing id query parameter".to_string()))?;
        sanitize_archive_id(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid archive id: {raw:?}")))
    }
}

/// GET /healthz
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
