//! Client for the storage service's archive API.

use parcel_core::{
    Checksum, FILE_SHA256_HEADER, FILE_SIZE_HEADER, UPLOAD_FORM_FIELD, UploadResponse,
};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StorageClientError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("storage service returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// A completed upload.
#[derive(Debug, Clone)]
pub struct UploadedArchive {
    pub id: String,
    pub checksum: Checksum,
}

#[derive(Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
}

impl StorageClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL from which the archive `id` can be downloaded.
    pub fn download_url(&self, id: &str) -> String {
        format!("{}/v1/archive?id={}", self.base_url, id)
    }

    /// Upload the file at `path` and return the id assigned by the service.
    ///
    /// The file is hashed in a first pass so the size and digest headers
    /// can be sent ahead of the body.
    pub async fn upload(&self, path: &Path) -> Result<UploadedArchive, StorageClientError> {
        let io_err = |context: &str| {
            let context = format!("{context} {}", path.display());
            move |source: std::io::Error| StorageClientError::Io { context, source }
        };

        let (size, checksum) = checksum_file(path).await.map_err(io_err("hash"))?;

        let file = tokio::fs::File::open(path).await.map_err(io_err("open"))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| UPLOAD_FORM_FIELD.to_string());
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size).file_name(file_name);
        let form = Form::new().part(UPLOAD_FORM_FIELD, part);

        let response = self
            .client
            .post(format!("{}/v1/archive", self.base_url))
            .header(FILE_SIZE_HEADER, size.to_string())
            .header(FILE_SHA256_HEADER, &checksum.sum)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let UploadResponse { id } = response.json().await?;
        info!(archive = %id, bytes = size, "Archive uploaded");
        Ok(UploadedArchive { id, checksum })
    }
}

/// Stream a file through sha256, returning its size and checksum.
pub async fn checksum_file(path: &Path) -> std::io::Result<(u64, Checksum)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Checksum::hasher();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hasher.finalize()))
}
