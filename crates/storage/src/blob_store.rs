//! Named artifact storage over a write container and read-only fallbacks.

use crate::error::{BlobStoreError, BlobStoreResult, StorageError};
use crate::progress::ProgressCounter;
use crate::registry::UploadRegistry;
use crate::traits::{ByteStream, Cursor, ListedItem, ListingPage, ObjectMeta, ObjectStore};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parcel_core::UploadStatus;
use parcel_core::config::BlobStoreConfig;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// An artifact opened for reading.
pub struct OpenedArtifact {
    pub stream: ByteStream,
    pub size: u64,
    /// Container the artifact was found in.
    pub container: String,
}

/// Artifact storage with upload progress tracking.
///
/// Writes always go to the write container. Lookups try the write
/// container first, then each fallback in declared order.
pub struct BlobStore {
    write: Arc<dyn ObjectStore>,
    fallbacks: Vec<Arc<dyn ObjectStore>>,
    uploads: UploadRegistry,
}

impl BlobStore {
    pub fn new(write: Arc<dyn ObjectStore>, fallbacks: Vec<Arc<dyn ObjectStore>>) -> Self {
        Self {
            write,
            fallbacks,
            uploads: UploadRegistry::new(),
        }
    }

    /// Resolve every configured container, creating them where needed.
    pub async fn from_config(config: &BlobStoreConfig) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::Config)?;
        let write = crate::from_config(&config.write).await?;
        let mut fallbacks = Vec::with_capacity(config.fallbacks.len());
        for fallback in &config.fallbacks {
            fallbacks.push(crate::from_config(fallback).await?);
        }
        Ok(Self::new(write, fallbacks))
    }

    pub fn write_container(&self) -> &Arc<dyn ObjectStore> {
        &self.write
    }

    pub fn uploads(&self) -> &UploadRegistry {
        &self.uploads
    }

    fn containers(&self) -> impl Iterator<Item = &Arc<dyn ObjectStore>> {
        std::iter::once(&self.write).chain(self.fallbacks.iter())
    }

    /// Store `stream` under `name` in the write container.
    ///
    /// An empty name is replaced by a generated one. The upload is tracked
    /// in the registry while bytes flow; `size` is the declared length, or
    /// -1 if unknown. Returns the artifact name.
    #[instrument(skip(self, stream), fields(container = %self.write.container()))]
    pub async fn put<S, E>(&self, name: &str, stream: S, size: i64) -> BlobStoreResult<String>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let name = if name.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            name.to_string()
        };

        let mut reader = self.uploads.declare(&name, size, Box::pin(stream));
        let counter = reader.counter().clone();
        let pending = self.uploads.guard(&name, counter.clone());
        let result = self.write_all(&name, &mut reader, &counter).await;
        drop(pending);

        let written = result?;
        if size >= 0 && written != size as u64 {
            warn!(
                name = %name,
                declared = size,
                written,
                "Upload size differs from declared size"
            );
        }
        debug!(name = %name, written, "Stored artifact");
        Ok(name)
    }

    async fn write_all<S, E>(
        &self,
        name: &str,
        reader: &mut S,
        counter: &ProgressCounter,
    ) -> BlobStoreResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut upload = self.write.put_stream(name).await.map_err(|e| {
            counter.fail(e.to_string());
            warn!(name = %name, error = %e, "Failed to start artifact write");
            BlobStoreError::Write
        })?;

        while let Some(chunk) = reader.next().await {
            let failure = match chunk {
                Ok(data) => match upload.write(data).await {
                    Ok(()) => continue,
                    Err(e) => {
                        counter.fail(e.to_string());
                        e.to_string()
                    }
                },
                // The reader has already recorded the error on the counter.
                Err(e) => e.to_string(),
            };
            warn!(name = %name, error = %failure, "Artifact write failed");
            if let Err(e) = upload.abort().await {
                warn!(name = %name, error = %e, "Failed to abort artifact write");
            }
            return Err(BlobStoreError::Write);
        }

        upload.finish().await.map_err(|e| {
            counter.fail(e.to_string());
            warn!(name = %name, error = %e, "Failed to commit artifact");
            BlobStoreError::Write
        })
    }

    /// Find `name` in the first container that has it.
    async fn locate(&self, name: &str) -> BlobStoreResult<(&Arc<dyn ObjectStore>, ObjectMeta)> {
        let mut first_error = None;
        for container in self.containers() {
            match container.head(name).await {
                Ok(meta) => return Ok((container, meta)),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(
                        name = %name,
                        container = %container.container(),
                        error = %e,
                        "Artifact lookup failed"
                    );
                    first_error.get_or_insert(BlobStoreError::Retrieval);
                }
            }
        }
        Err(first_error.unwrap_or(BlobStoreError::NotFound))
    }

    /// Open `name` for streaming.
    #[instrument(skip(self))]
    pub async fn open(&self, name: &str) -> BlobStoreResult<OpenedArtifact> {
        let mut first_error = None;
        for container in self.containers() {
            let meta = match container.head(name).await {
                Ok(meta) => meta,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(name = %name, container = %container.container(), error = %e, "Artifact lookup failed");
                    first_error.get_or_insert(BlobStoreError::Retrieval);
                    continue;
                }
            };
            match container.get_stream(name).await {
                Ok(stream) => {
                    return Ok(OpenedArtifact {
                        stream,
                        size: meta.size,
                        container: container.container().to_string(),
                    });
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(name = %name, container = %container.container(), error = %e, "Failed to open artifact");
                    first_error.get_or_insert(BlobStoreError::Open);
                }
            }
        }
        Err(first_error.unwrap_or(BlobStoreError::NotFound))
    }

    /// Delete `name` from the first container holding it.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> BlobStoreResult<()> {
        let (container, _) = self.locate(name).await?;
        container.delete(name).await.map_err(|e| {
            if e.is_not_found() {
                BlobStoreError::NotFound
            } else {
                warn!(name = %name, container = %container.container(), error = %e, "Failed to delete artifact");
                BlobStoreError::Retrieval
            }
        })
    }

    /// Progress of `name` and its declared size.
    ///
    /// A stored artifact with no pending upload reports as complete.
    pub async fn progress(&self, name: &str) -> BlobStoreResult<(Arc<ProgressCounter>, i64)> {
        if let Some(pending) = self.uploads.get(name) {
            return Ok(pending);
        }
        let (_, meta) = self.locate(name).await?;
        let size = meta.size as i64;
        Ok((Arc::new(ProgressCounter::completed(size)), size))
    }

    /// Current status record for `name`.
    pub async fn status(&self, name: &str) -> BlobStoreResult<UploadStatus> {
        let (counter, size) = self.progress(name).await?;
        Ok(counter.snapshot().to_status(size))
    }

    /// Attach client metadata to an upload, pending or not yet declared.
    pub fn set_extra(&self, name: &str, extra: serde_json::Value) {
        self.uploads.set_extra(name, extra);
    }

    /// One page of the write container's listing, keeping items that
    /// pass `filter`.
    ///
    /// `next` reflects the unfiltered listing, so a page may be empty
    /// while more remain.
    pub async fn list<F>(
        &self,
        prefix: &str,
        cursor: &Cursor,
        page_size: usize,
        filter: F,
    ) -> BlobStoreResult<ListingPage>
    where
        F: Fn(&ListedItem) -> bool,
    {
        let page = self
            .write
            .list_page(prefix, cursor, page_size)
            .await
            .map_err(|e| {
                warn!(container = %self.write.container(), error = %e, "Listing failed");
                BlobStoreError::Retrieval
            })?;
        Ok(ListingPage {
            items: page.items.into_iter().filter(|item| filter(item)).collect(),
            next: page.next,
        })
    }

    /// Check every container's backend.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        for container in self.containers() {
            container.health_check().await?;
        }
        Ok(())
    }
}
