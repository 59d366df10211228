//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration for the storage service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Cadence of the streaming status endpoint in milliseconds.
    #[serde(default = "default_events_interval_ms")]
    pub events_interval_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_events_interval_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            events_interval_ms: default_events_interval_ms(),
        }
    }
}

impl ServerConfig {
    pub fn events_interval(&self) -> Duration {
        Duration::from_millis(self.events_interval_ms.max(1))
    }
}

/// A named container on a storage backend.
///
/// The `type` tag selects the backend driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContainerConfig {
    /// A subdirectory of a local directory.
    Filesystem {
        /// Backend root directory.
        path: PathBuf,
        /// Container subdirectory, created on first use.
        #[serde(default = "default_container")]
        container: String,
    },
    /// A key prefix inside an S3-compatible bucket.
    S3 {
        bucket: String,
        /// Key prefix acting as the container.
        #[serde(default = "default_container")]
        container: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        region: Option<String>,
        /// Falls back to the ambient AWS credential chain if unset.
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

fn default_container() -> String {
    "archives".to_string()
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/archives"),
            container: default_container(),
        }
    }
}

impl ContainerConfig {
    /// Name of the container within its backend.
    pub fn container(&self) -> &str {
        match self {
            Self::Filesystem { container, .. } | Self::S3 { container, .. } => container,
        }
    }

    /// Validate container configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.container().is_empty()
            || self.container().contains("..")
            || self.container().starts_with('/')
        {
            return Err(format!("invalid container name: {:?}", self.container()));
        }
        match self {
            Self::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            Self::Filesystem { .. } => Ok(()),
        }
    }
}

/// The write container plus read-only fallbacks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    #[serde(default)]
    pub write: ContainerConfig,
    /// Consulted in order for lookups after the write container.
    #[serde(default)]
    pub fallbacks: Vec<ContainerConfig>,
}

impl BlobStoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.write.validate()?;
        for fallback in &self.fallbacks {
            fallback.validate()?;
        }
        Ok(())
    }
}

/// Archive pruner configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrunerConfig {
    #[serde(default = "default_pruner_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps (default: 1 hour).
    #[serde(default = "default_pruner_interval_secs")]
    pub interval_secs: u64,
    /// Artifacts younger than this are never pruned (default: 60 seconds).
    #[serde(default = "default_pruner_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Listing page size.
    #[serde(default = "default_pruner_page_size")]
    pub page_size: usize,
    /// Endpoint returning the JSON array of still-referenced archives.
    /// The pruner does not run without one.
    #[serde(default)]
    pub oracle_url: Option<String>,
}

fn default_pruner_enabled() -> bool {
    true
}

fn default_pruner_interval_secs() -> u64 {
    3600
}

fn default_pruner_grace_period_secs() -> u64 {
    60
}

fn default_pruner_page_size() -> usize {
    1000
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            enabled: default_pruner_enabled(),
            interval_secs: default_pruner_interval_secs(),
            grace_period_secs: default_pruner_grace_period_secs(),
            page_size: default_pruner_page_size(),
            oracle_url: None,
        }
    }
}

impl PrunerConfig {
    pub fn interval(&self) -> Duration {
        // tokio::time::interval panics on zero
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Complete storage service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: BlobStoreConfig,
    #[serde(default)]
    pub pruner: PrunerConfig,
}

impl StorageServiceConfig {
    /// Create a test configuration rooted at `root`.
    ///
    /// **For testing only.** Uses a single filesystem container and no pruner.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                events_interval_ms: 20,
                ..Default::default()
            },
            storage: BlobStoreConfig {
                write: ContainerConfig::Filesystem {
                    path: root.into(),
                    container: default_container(),
                },
                fallbacks: Vec::new(),
            },
            pruner: PrunerConfig {
                enabled: false,
                ..Default::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()
    }
}

/// Basic credentials for a container registry domain.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Retry budget for the specialize handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 30).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay unit; attempt `i` waits `i * base_delay_ms` before retrying.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Complete fetcher agent configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_fetcher_bind")]
    pub bind: String,
    /// Volume shared with the sandbox runtime.
    #[serde(default = "default_shared_volume_path")]
    pub shared_volume_path: PathBuf,
    /// Root under which secrets are written as `{namespace}/{name}/{key}`.
    #[serde(default = "default_secret_dir")]
    pub secret_dir: PathBuf,
    /// Root under which config maps are written as `{namespace}/{name}/{key}`.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Base URL of the resource API serving packages, secrets and config maps.
    #[serde(default = "default_resource_api_url")]
    pub resource_api_url: String,
    /// Base URL of the sandbox runtime.
    #[serde(default = "default_runtime_url")]
    pub runtime_url: String,
    /// Registry used for image references without an explicit domain.
    #[serde(default = "default_registry_url")]
    pub default_registry_url: String,
    /// Basic credentials keyed by registry domain.
    #[serde(default)]
    pub registry_credentials: BTreeMap<String, RegistryCredentials>,
    #[serde(default)]
    pub specialize_on_startup: bool,
    /// JSON-encoded specialize request used when `specialize_on_startup` is set.
    #[serde(default)]
    pub specialize_request: Option<String>,
    #[serde(default)]
    pub specialize: RetryConfig,
}

fn default_fetcher_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_shared_volume_path() -> PathBuf {
    PathBuf::from("/userfunc")
}

fn default_secret_dir() -> PathBuf {
    PathBuf::from("/secrets")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/configs")
}

fn default_resource_api_url() -> String {
    "http://controller.parcel".to_string()
}

fn default_runtime_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_registry_url() -> String {
    "https://registry-1.docker.io".to_string()
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            bind: default_fetcher_bind(),
            shared_volume_path: default_shared_volume_path(),
            secret_dir: default_secret_dir(),
            config_dir: default_config_dir(),
            resource_api_url: default_resource_api_url(),
            runtime_url: default_runtime_url(),
            default_registry_url: default_registry_url(),
            registry_credentials: BTreeMap::new(),
            specialize_on_startup: false,
            specialize_request: None,
            specialize: RetryConfig::default(),
        }
    }
}

impl FetcherConfig {
    /// Validate fetcher configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.specialize_on_startup && self.specialize_request.is_none() {
            return Err("specialize_on_startup requires specialize_request".to_string());
        }
        if self.specialize.max_attempts == 0 {
            return Err("specialize.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}
