//! Fetcher error types.

use crate::specialize::SpecializeError;
use crate::tarextract::ExtractError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Errors from fetch, upload and specialize operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("unsupported checksum: {0}")]
    UnsupportedChecksum(String),

    #[error("nothing to fetch for package {0}")]
    NothingToFetch(String),

    #[error("build status for package {package} is {status}, can't fetch deployment")]
    BuildNotReady { package: String, status: String },

    #[error("downloaded blob failed to match digest {0}")]
    ImageDigestMismatch(String),

    #[error("image fetch failed: {0}")]
    Image(String),

    #[error("secret {0} not found")]
    SecretNotFound(String),

    #[error("config map {0} not found")]
    ConfigMapNotFound(String),

    #[error("failed to retrieve {kind} {name}: {reason}")]
    ResourceRetrieval {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error specializing function pod after {attempts} attempt(s): {source}")]
    Specialize {
        attempts: u32,
        #[source]
        source: SpecializeError,
    },

    #[error("upload failed: {0}")]
    Upload(String),
}

impl FetchError {
    /// Wrap an I/O error with what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Download { .. } => "download_failed",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::UnsupportedChecksum(_) => "unsupported_checksum",
            Self::NothingToFetch(_) => "nothing_to_fetch",
            Self::BuildNotReady { .. } => "build_not_ready",
            Self::ImageDigestMismatch(_) => "image_digest_mismatch",
            Self::Image(_) => "image_fetch_failed",
            Self::SecretNotFound(_) => "secret_not_found",
            Self::ConfigMapNotFound(_) => "configmap_not_found",
            Self::ResourceRetrieval { .. } => "resource_retrieval_failed",
            Self::Extraction(_) => "extraction_failed",
            Self::Io { .. } => "io_error",
            Self::Specialize { .. } => "specialize_failed",
            Self::Upload(_) => "upload_failed",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::Download { .. }
            | Self::ChecksumMismatch { .. }
            | Self::UnsupportedChecksum(_)
            | Self::NothingToFetch(_) => StatusCode::BAD_REQUEST,
            Self::SecretNotFound(_) | Self::ConfigMapNotFound(_) => StatusCode::NOT_FOUND,
            Self::BuildNotReady { .. }
            | Self::ImageDigestMismatch(_)
            | Self::Image(_)
            | Self::ResourceRetrieval { .. }
            | Self::Extraction(_)
            | Self::Io { .. }
            | Self::Specialize { .. }
            | Self::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ExtractError> for FetchError {
    fn from(e: ExtractError) -> Self {
        Self::Extraction(e.to_string())
    }
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for fetcher operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_resources_map_to_404() {
        assert_eq!(
            FetchError::SecretNotFound("default/db".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            FetchError::ResourceRetrieval {
                kind: "secret",
                name: "default/db".into(),
                reason: "timeout".into(),
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn build_not_ready_has_distinct_code() {
        let err = FetchError::BuildNotReady {
            package: "default/hello".into(),
            status: "running".into(),
        };
        assert_eq!(err.code(), "build_not_ready");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
