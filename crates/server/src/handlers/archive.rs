//! Archive upload, download and delete handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::IdQuery;
use crate::metrics::{
    ACTIVE_UPLOADS, BYTES_UPLOADED, DIGEST_MISMATCHES, DOWNLOADS, UPLOAD_DURATION,
    UPLOADS_COMPLETED, UPLOADS_STARTED, record_upload_error,
};
use crate::multipart::{FormPart, FormPartVisitor, Rollback, read_form};
use crate::state::AppState;
use async_trait::async_trait;
use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use parcel_core::{
    Checksum, FILE_SHA256_HEADER, FILE_SIZE_HEADER, UPLOAD_FORM_FIELD, UploadResponse,
    sanitize_archive_id,
};
use parcel_storage::{BlobStore, BlobStoreError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Upload headers, parsed before the body is read.
struct UploadHeaders {
    size: i64,
    sha256: Option<String>,
}

impl UploadHeaders {
    fn parse(headers: &HeaderMap) -> ApiResult<Self> {
        let raw_size = headers
            .get(FILE_SIZE_HEADER)
            .ok_or_else(|| ApiError::BadRequest("missing X-File-Size header".to_string()))?;
        let size = raw_size
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::BadRequest("invalid X-File-Size header".to_string()))?;

        let sha256 = match headers.get(FILE_SHA256_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ApiError::BadRequest("invalid X-File-Sha256 header".to_string()))?
                    .trim()
                    .to_string(),
            ),
            None => None,
        };

        Ok(Self { size, sha256 })
    }
}

/// Streams the `uploaded` part into the blob store, hashing as it goes.
struct ArchiveVisitor {
    store: Arc<BlobStore>,
    name: String,
    size: i64,
    stored: Option<(String, Checksum)>,
}

impl ArchiveVisitor {
    fn is_upload_part(part: &FormPart<'_>) -> bool {
        part.name == UPLOAD_FORM_FIELD || part.file_name == UPLOAD_FORM_FIELD
    }
}

#[async_trait]
impl FormPartVisitor for ArchiveVisitor {
    async fn visit(&mut self, part: FormPart<'_>) -> Result<Rollback, ApiError> {
        if !Self::is_upload_part(&part) {
            return Err(ApiError::BadRequest(format!(
                "unexpected form part {:?}",
                part.name
            )));
        }
        if self.stored.is_some() {
            return Err(ApiError::BadRequest("duplicate upload part".to_string()));
        }

        let mut hasher = Checksum::hasher();
        let teed = part.body.map(|chunk| {
            if let Ok(data) = &chunk {
                hasher.update(data);
            }
            chunk
        });
        let name = self.store.put(&self.name, teed, self.size).await?;
        let checksum = hasher.finalize();
        self.stored = Some((name.clone(), checksum));

        let store = self.store.clone();
        Ok(Box::new(move || {
            Box::pin(async move {
                if let Err(e) = store.remove(&name).await {
                    warn!(upload = %name, error = %e, "Failed to roll back stored archive");
                }
            })
        }))
    }
}

/// POST /v1/archive
pub async fn upload_archive(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    receive_archive(state, String::new(), headers, multipart).await
}

/// POST /v1/archive/{id}
pub async fn upload_named_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let name = sanitize_archive_id(&id)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid archive id: {id:?}")))?;
    receive_archive(state, name, headers, multipart).await
}

async fn receive_archive(
    state: AppState,
    name: String,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let upload = UploadHeaders::parse(&headers).inspect_err(|_| record_upload_error("headers"))?;

    UPLOADS_STARTED.inc();
    ACTIVE_UPLOADS.inc();
    let start = Instant::now();

    let mut visitor = ArchiveVisitor {
        store: state.store.clone(),
        name,
        size: upload.size,
        stored: None,
    };
    let result = read_form(&mut multipart, &mut visitor).await;
    ACTIVE_UPLOADS.dec();
    if let Err(e) = result {
        record_upload_error(e.code());
        return Err(e);
    }

    let Some((id, checksum)) = visitor.stored else {
        record_upload_error("missing_part");
        return Err(ApiError::BadRequest("missing upload file".to_string()));
    };

    if let Some(expected) = upload.sha256
        && expected != checksum.sum
    {
        DIGEST_MISMATCHES.inc();
        record_upload_error("digest_mismatch");
        warn!(upload = %id, expected = %expected, actual = %checksum.sum, "Archive digest mismatch");
        if let Err(e) = state.store.remove(&id).await {
            warn!(upload = %id, error = %e, "Failed to remove archive after digest mismatch");
        }
        return Err(ApiError::DigestMismatch {
            expected,
            actual: checksum.sum,
        });
    }

    UPLOADS_COMPLETED.inc();
    if upload.size > 0 {
        BYTES_UPLOADED.inc_by(upload.size as u64);
    }
    UPLOAD_DURATION.observe(start.elapsed().as_secs_f64());
    info!(upload = %id, size = upload.size, checksum = %checksum, "Stored archive");

    Ok(Json(UploadResponse { id }))
}

/// GET /v1/archive?id=
pub async fn download_archive(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> ApiResult<Response> {
    let id = query.archive_id()?;
    let opened = state.store.open(&id).await?;
    DOWNLOADS.inc();

    let container = opened.container;
    let name = id.clone();
    let body = opened.stream.inspect_err(move |e| {
        warn!(
            upload = %name,
            container = %container,
            error = %e,
            "{}",
            BlobStoreError::ResponseWrite
        );
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, opened.size.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// DELETE /v1/archive?id=
pub async fn delete_archive(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> ApiResult<StatusCode> {
    let id = query.archive_id()?;
    state.store.remove(&id).await?;
    info!(upload = %id, "Deleted archive");
    Ok(StatusCode::OK)
}
