//! Requests accepted by the fetcher agent.

use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};

/// Where the fetcher should obtain an artifact from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    /// A raw URL, downloaded without integrity checks.
    Url,
    /// The source archive of a stored package.
    Source,
    /// The deployment archive of a stored package, available once built.
    Deployment,
}

/// Reference to a package held by the resource API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub namespace: String,
    pub name: String,
}

/// Reference to a secret to materialize into the sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

/// Reference to a config map to materialize into the sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapReference {
    pub namespace: String,
    pub name: String,
}

/// A request to place an artifact in the shared volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub fetch_type: FetchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Destination name inside the shared volume.
    #[serde(default)]
    pub filename: String,
    /// Skip extraction of recognized archive formats.
    #[serde(default)]
    pub keep_archive: bool,
    #[serde(default)]
    pub secrets: Vec<SecretReference>,
    #[serde(default)]
    pub config_maps: Vec<ConfigMapReference>,
}

impl FetchRequest {
    /// A raw URL fetch into `filename`.
    pub fn url(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            fetch_type: FetchType::Url,
            package: None,
            url: Some(url.into()),
            filename: filename.into(),
            keep_archive: false,
            secrets: Vec::new(),
            config_maps: Vec::new(),
        }
    }

    /// A stored-package fetch of the given kind into `filename`.
    pub fn package(
        fetch_type: FetchType,
        package: PackageReference,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            fetch_type,
            package: Some(package),
            url: None,
            filename: filename.into(),
            keep_archive: false,
            secrets: Vec::new(),
            config_maps: Vec::new(),
        }
    }
}

/// Instructions forwarded to the sandbox runtime when specializing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    /// Path the artifact is fetched to and the runtime loads from.
    #[serde(rename = "filepath")]
    pub filepath: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub entry_point: String,
    /// Runtime protocol version; 2 and above use the JSON endpoint.
    #[serde(default)]
    pub env_version: i32,
}

/// Fetch followed by a load handshake with the sandbox runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecializeRequest {
    pub fetch_req: FetchRequest,
    pub load_req: LoadRequest,
}

/// Ask the fetcher to push a local file to a storage service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveUploadRequest {
    pub filename: String,
    pub storage_svc_url: String,
    #[serde(default)]
    pub archive_package: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveUploadResponse {
    pub archive_download_url: String,
    pub checksum: Checksum,
}
