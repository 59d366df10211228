//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parcel_storage::BlobStoreError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("malformed multipart body: {0}")]
    Multipart(String),

    #[error("{0}")]
    Store(#[from] BlobStoreError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::DigestMismatch { .. } => "digest_mismatch",
            Self::Multipart(_) => "malformed_multipart",
            Self::Store(e) => match e {
                BlobStoreError::NotFound => "not_found",
                BlobStoreError::Retrieval => "retrieval_error",
                BlobStoreError::Open => "open_error",
                BlobStoreError::Write => "write_error",
                BlobStoreError::ResponseWrite => "response_write_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::DigestMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::Store(e) => match e {
                BlobStoreError::NotFound => StatusCode::NOT_FOUND,
                BlobStoreError::Retrieval | BlobStoreError::Open => StatusCode::BAD_REQUEST,
                BlobStoreError::Write | BlobStoreError::ResponseWrite => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
