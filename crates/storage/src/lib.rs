//! Artifact storage for parcel.
//!
//! This crate provides:
//! - Container-scoped object stores over pluggable backends
//! - A blob store combining a write container with read-only fallbacks
//! - In-flight upload tracking with live progress snapshots

pub mod backends;
pub mod blob_store;
pub mod error;
pub mod progress;
pub mod registry;
pub mod traits;

pub use backends::{
    filesystem::FilesystemBackend,
    s3::{S3Backend, S3Options},
};
pub use blob_store::{BlobStore, OpenedArtifact};
pub use error::{BlobStoreError, BlobStoreResult, StorageError, StorageResult};
pub use progress::{Progress, ProgressCounter, ProgressReader, Terminal, Ticker};
pub use registry::{PendingGuard, UploadRegistry};
pub use traits::{
    ByteStream, ContinuationToken, Cursor, ListedItem, ListingPage, ObjectMeta, ObjectStore,
    StreamingUpload,
};

use parcel_core::config::ContainerConfig;
use std::sync::Arc;

/// Resolve a container from configuration, creating it if needed.
pub async fn from_config(config: &ContainerConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        ContainerConfig::Filesystem { path, container } => {
            let backend = FilesystemBackend::new(path, container).await?;
            Ok(Arc::new(backend))
        }
        ContainerConfig::S3 {
            bucket,
            container,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(S3Options {
                bucket: bucket.clone(),
                container: container.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                force_path_style: *force_path_style,
            })
            .await?;
            tracing::info!(
                endpoint = backend.endpoint(),
                bucket = %bucket,
                container = backend.container(),
                "Resolved S3 container"
            );
            Ok(Arc::new(backend))
        }
    }
}
