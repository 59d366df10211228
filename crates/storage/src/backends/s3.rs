//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, ContinuationToken, Cursor, ListedItem, ListingPage, ObjectMeta, ObjectStore,
    StreamingUpload, normalize_page_size,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Marker included in lazy-credentials initialization errors so we can map them
/// to actionable storage config errors instead of generic S3 transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "parcel-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "parcel-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects (notably TLS/native-root initialization)
/// in environments where no root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

/// Connection settings for an S3-compatible container.
#[derive(Clone, Debug, Default)]
pub struct S3Options {
    pub bucket: String,
    /// Key prefix acting as the container.
    pub container: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Use path-style URLs (`endpoint/bucket/key`); required for MinIO.
    pub force_path_style: bool,
}

/// A container inside an S3 bucket, addressed by key prefix.
pub struct S3Backend {
    client: Client,
    bucket: String,
    container: String,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("container", &self.container)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client for the container. No request is made until first use.
    pub async fn new(options: S3Options) -> StorageResult<Self> {
        let S3Options {
            bucket,
            container,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
        } = options;

        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }
        let container = container.trim_matches('/').to_string();
        if container.is_empty() || container.split('/').any(|s| s == "..") {
            return Err(StorageError::Config(format!(
                "invalid container name: {container:?}"
            )));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "parcel-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        // Bare host:port endpoints (e.g. "minio:9000") are treated as plain HTTP.
        let normalized_endpoint = endpoint.map(|endpoint_url| {
            let lower = endpoint_url.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint_url
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // HTTP-only client so local endpoints do not need native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());
        let endpoint = normalized_endpoint
            .unwrap_or_else(|| format!("s3.{resolved_region}.amazonaws.com"));

        Ok(Self {
            client,
            bucket,
            container,
            endpoint,
            region: resolved_region,
        })
    }

    /// Endpoint this backend talks to, normalized.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Object key for an artifact inside the container.
    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.container, key)
    }

    /// Key relative to the container.
    fn strip_container<'a>(&self, full_key: &'a str) -> &'a str {
        full_key
            .strip_prefix(self.container.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(full_key)
    }

    /// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err
            && service_err.raw().status().as_u16() == 404
        {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }
}

fn to_offset_datetime(key: &str, dt: &aws_sdk_s3::primitives::DateTime) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.secs())
        .inspect_err(|e| {
            tracing::warn!(
                key = %key,
                timestamp = dt.secs(),
                error = %e,
                "Failed to convert S3 timestamp, object will be treated as recent"
            );
        })
        .ok()
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3", container = %self.container))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|dt| to_offset_datetime(key, dt)),
        })
    }

    #[instrument(skip(self), fields(backend = "s3", container = %self.container))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use futures::StreamExt;

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|result| result.map_err(StorageError::Io));

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "s3", container = %self.container))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let full_key = self.full_key(key);
        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: full_key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            bytes_written: 0,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
            settled: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "s3", container = %self.container))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // delete_object succeeds for missing keys, so probe first.
        self.head(key).await?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(())
    }

    #[instrument(skip(self, cursor), fields(backend = "s3", container = %self.container))]
    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        page_size: usize,
    ) -> StorageResult<ListingPage> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .max_keys(normalize_page_size(page_size) as i32);

        match cursor {
            Cursor::End => {
                return Ok(ListingPage {
                    items: Vec::new(),
                    next: Cursor::End,
                });
            }
            Cursor::Start => {}
            Cursor::Next(token) => {
                request = request.continuation_token(token.as_str()?);
            }
        }

        let output = request.send().await.map_err(|e| {
            if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = e
                && service_err.raw().status().as_u16() == 400
                && format!("{:?}", service_err.err()).contains("continuation")
            {
                return StorageError::InvalidContinuationToken(
                    "S3 rejected continuation token".to_string(),
                );
            }
            map_s3_operation_error(e)
        })?;

        let items = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let full_key = obj.key()?;
                let key = self.strip_container(full_key);
                Some(ListedItem {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| to_offset_datetime(key, dt)),
                })
            })
            .collect();

        let next = match output.next_continuation_token() {
            Some(token) if output.is_truncated() == Some(true) => {
                Cursor::Next(ContinuationToken::from_string(token)?)
            }
            _ => Cursor::End,
        };

        Ok(ListingPage { items, next })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn container(&self) -> &str {
        &self.container
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let probe = async {
            self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(self.full_key(""))
                .max_keys(1)
                .send()
                .await
                .map_err(map_s3_operation_error)?;
            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}

/// Streaming upload for S3 backend using multipart upload.
///
/// Buffers incoming data up to S3's 5 MiB minimum part size. Dropping the
/// upload before it completes or aborts aborts the multipart upload in the
/// background.
struct S3Upload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    bytes_written: u64,
    buffer: Vec<u8>,
    settled: bool,
}

impl Drop for S3Upload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                "Multipart upload dropped outside a runtime; not aborted"
            );
            return;
        };
        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        handle.spawn(async move {
            if let Err(e) = client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                tracing::warn!(
                    key = %key,
                    upload_id = %upload_id,
                    error = %e,
                    "Failed to abort dropped multipart upload"
                );
            }
        });
    }
}

impl S3Upload {
    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let upload_output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let completed_part = aws_sdk_s3::types::CompletedPart::builder()
            .e_tag(upload_output.e_tag().unwrap_or_default())
            .part_number(self.part_number)
            .build();

        self.parts.push(completed_part);
        self.part_number += 1;

        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3Upload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= MIN_PART_SIZE {
            let part_data: Vec<u8> = self.buffer.drain(..MIN_PART_SIZE).collect();
            self.upload_part(Bytes::from(part_data)).await?;
        }

        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        // The last part may be smaller than MIN_PART_SIZE.
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.upload_part(Bytes::from(rest)).await?;
        }

        // Multipart uploads need at least one non-empty part; empty
        // artifacts go through PutObject instead.
        if self.parts.is_empty() {
            self.settled = true;
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&self.key)
                .upload_id(&self.upload_id)
                .send()
                .await
            {
                tracing::warn!(
                    key = %self.key,
                    upload_id = %self.upload_id,
                    error = %e,
                    "Failed to abort multipart upload for zero-byte artifact"
                );
            }

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(Bytes::new().into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;

            return Ok(self.bytes_written);
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        self.settled = true;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.settled = true;
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(())
    }
}
