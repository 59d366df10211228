//! Storage error types.

use thiserror::Error;

/// Backend-level storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The fixed error vocabulary that crosses the blob store boundary.
///
/// Messages are constant so backend details never reach clients; the
/// underlying cause is logged where the error is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlobStoreError {
    #[error("item not found")]
    NotFound,

    #[error("error retrieving item")]
    Retrieval,

    #[error("error opening item")]
    Open,

    #[error("error writing file")]
    Write,

    #[error("error writing response")]
    ResponseWrite,
}

/// Result type for blob store operations.
pub type BlobStoreResult<T> = std::result::Result<T, BlobStoreError>;
