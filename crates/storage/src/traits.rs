//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Default number of items per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 10000;

/// Maximum size for continuation tokens (2 KB).
pub const MAX_TOKEN_SIZE: usize = 2048;

/// An opaque, backend-specific continuation token.
#[derive(Clone, PartialEq, Eq)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    /// Create a new continuation token from raw bytes.
    ///
    /// Returns an error if the token exceeds MAX_TOKEN_SIZE.
    pub fn new(data: Vec<u8>) -> StorageResult<Self> {
        if data.len() > MAX_TOKEN_SIZE {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token too large: {} bytes (max: {})",
                data.len(),
                MAX_TOKEN_SIZE
            )));
        }
        Ok(Self(data))
    }

    pub fn from_string(s: impl Into<String>) -> StorageResult<Self> {
        Self::new(s.into().into_bytes())
    }

    /// Get the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Interpret the token as UTF-8.
    pub fn as_str(&self) -> StorageResult<&str> {
        std::str::from_utf8(&self.0).map_err(|e| {
            StorageError::InvalidContinuationToken(format!("token is not valid UTF-8: {e}"))
        })
    }

    /// Convert to base64 for serialization.
    pub fn to_base64(&self) -> String {
        use base64::{Engine as _, engine::general_purpose};
        general_purpose::STANDARD.encode(&self.0)
    }

    /// Parse from base64.
    pub fn from_base64(s: &str) -> StorageResult<Self> {
        // Reject before decoding so oversized input never allocates.
        const MAX_BASE64_INPUT: usize = MAX_TOKEN_SIZE * 2;
        if s.len() > MAX_BASE64_INPUT {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token base64 too large: {} bytes (max: {})",
                s.len(),
                MAX_BASE64_INPUT
            )));
        }

        use base64::{Engine as _, engine::general_purpose};
        let data = general_purpose::STANDARD.decode(s).map_err(|e| {
            StorageError::InvalidContinuationToken(format!(
                "invalid continuation token base64: {e}"
            ))
        })?;
        Self::new(data)
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContinuationToken")
            .field(&"<redacted>")
            .finish()
    }
}

/// Position within a paginated listing session.
///
/// A session begins at [`Cursor::Start`] and is exhausted once a page
/// returns [`Cursor::End`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cursor {
    Start,
    Next(ContinuationToken),
    End,
}

impl Cursor {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// A listed object.
#[derive(Clone, Debug)]
pub struct ListedItem {
    /// Key relative to the container.
    pub key: String,
    pub size: u64,
    /// Creation or last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// A single page of listing results.
#[derive(Clone, Debug)]
pub struct ListingPage {
    pub items: Vec<ListedItem>,
    /// Where the next page starts, or [`Cursor::End`].
    pub next: Cursor,
}

/// Clamp a requested page size to the supported range.
pub fn normalize_page_size(page_size: usize) -> usize {
    page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// A container on a storage backend.
///
/// Keys are relative to the container; every method is scoped to it.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Get an object's size and modification time without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Start a streaming upload; the object becomes visible on `finish`.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Fetch one page of objects whose key starts with `prefix`.
    ///
    /// Passing [`Cursor::End`] yields an empty final page.
    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        page_size: usize,
    ) -> StorageResult<ListingPage>;

    /// Get the name of this storage backend, for logging.
    fn backend_name(&self) -> &'static str;

    /// Name of the container this store is scoped to.
    fn container(&self) -> &str;

    /// Verify storage backend connectivity.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
