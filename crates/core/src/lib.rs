//! Core domain types shared across the parcel artifact pipeline.
//!
//! This crate defines the data model used by the storage service and the
//! in-sandbox fetcher:
//! - Content checksums and incremental hashing
//! - Fetch, load and specialize requests
//! - Package, archive, secret and config map records
//! - Upload status records reported by the storage service
//! - Configuration for both services

pub mod checksum;
pub mod config;
pub mod error;
pub mod fetch;
pub mod package;
pub mod upload;

pub use checksum::{Checksum, ChecksumHasher, ChecksumType};
pub use error::{Error, Result};
pub use fetch::{
    ArchiveUploadRequest, ArchiveUploadResponse, ConfigMapReference, FetchRequest, FetchType,
    LoadRequest, PackageReference, SecretReference, SpecializeRequest,
};
pub use package::{Archive, BuildStatus, ConfigMap, Package, ResourceMeta, Secret};
pub use upload::{UploadResponse, UploadState, UploadStatus, sanitize_archive_id};

/// Name of the multipart form part carrying an uploaded archive.
pub const UPLOAD_FORM_FIELD: &str = "uploaded";

/// Header carrying the declared size of an uploaded archive in bytes.
pub const FILE_SIZE_HEADER: &str = "x-file-size";

/// Header carrying the expected lowercase hex sha256 of an uploaded archive.
pub const FILE_SHA256_HEADER: &str = "x-file-sha256";
