//! Retrieval, materialization, upload and specialization of function artifacts.

use crate::archive;
use crate::docker::DockerBlobFetcher;
use crate::error::{FetchError, FetchResult};
use crate::resources::{HttpResourceClient, ResourceClient, ResourceError};
use crate::specialize::{
    HttpSpecializeTransport, RetryPolicy, SpecializeCall, SpecializeTransport,
    specialize_with_retry,
};
use crate::storage_client::StorageClient;
use futures::StreamExt;
use parcel_core::config::FetcherConfig;
use parcel_core::{
    ArchiveUploadRequest, ArchiveUploadResponse, Checksum, ConfigMapReference, FetchRequest,
    FetchType, SecretReference, SpecializeRequest,
};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Places artifacts, secrets and config maps into the sandbox and hands
/// control to the runtime.
pub struct Fetcher {
    shared_volume: PathBuf,
    secret_dir: PathBuf,
    config_dir: PathBuf,
    runtime_url: String,
    http: reqwest::Client,
    resources: Arc<dyn ResourceClient>,
    docker: DockerBlobFetcher,
    transport: Arc<dyn SpecializeTransport>,
    retry: RetryPolicy,
}

impl Fetcher {
    /// Build a fetcher talking HTTP to the configured peers.
    pub fn from_config(config: &FetcherConfig) -> Self {
        let http = reqwest::Client::new();

        let docker = DockerBlobFetcher::new(http.clone(), &config.default_registry_url);
        for (domain, creds) in &config.registry_credentials {
            docker.set_basic_auth_for_domain(domain, &creds.username, &creds.password);
        }

        Self {
            shared_volume: config.shared_volume_path.clone(),
            secret_dir: config.secret_dir.clone(),
            config_dir: config.config_dir.clone(),
            runtime_url: config.runtime_url.clone(),
            resources: Arc::new(HttpResourceClient::new(
                http.clone(),
                &config.resource_api_url,
            )),
            transport: Arc::new(HttpSpecializeTransport::new(http.clone())),
            docker,
            http,
            retry: RetryPolicy::from(&config.specialize),
        }
    }

    /// Replace the transport used for the specialize handshake.
    pub fn with_transport(mut self, transport: Arc<dyn SpecializeTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Create the shared volume and the secret and config roots.
    pub async fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.shared_volume, &self.secret_dir, &self.config_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Fetch into the shared volume, then materialize secrets and config maps.
    pub async fn fetch_into_shared_volume(&self, req: &FetchRequest) -> FetchResult<()> {
        let started = Instant::now();
        let result = async {
            let dest = self.shared_volume_path(&req.filename)?;
            self.fetch(req, &dest).await?;
            self.fetch_secrets_and_config_maps(&req.secrets, &req.config_maps)
                .await
        }
        .await;
        info!(
            filename = %req.filename,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Fetch request finished"
        );
        result
    }

    /// Place the artifact described by `req` at `dest`.
    ///
    /// An existing `dest` short-circuits to success. Content is staged at
    /// `<dest>.tmp` and renamed into place; a failed stage leaves the
    /// temporary path behind.
    pub async fn fetch(&self, req: &FetchRequest, dest: &Path) -> FetchResult<()> {
        if req.filename.is_empty() {
            return Err(FetchError::InvalidRequest(
                "fetch request has an empty filename".to_string(),
            ));
        }
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            info!(path = %dest.display(), "Requested file already exists, skipping fetch");
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(format!("mkdir {}", parent.display()), e))?;
        }

        let staged = tmp_sibling(dest);
        match req.fetch_type {
            FetchType::Url => {
                let url = req.url.as_deref().filter(|u| !u.is_empty()).ok_or_else(|| {
                    FetchError::InvalidRequest("url fetch without a url".to_string())
                })?;
                self.download(url, &staged).await?;
            }
            FetchType::Source | FetchType::Deployment => {
                self.stage_package(req, &staged).await?;
            }
        }

        let source = if req.keep_archive {
            staged
        } else {
            self.extract_if_archive(&staged, dest).await?
        };

        tokio::fs::rename(&source, dest).await.map_err(|e| {
            FetchError::io(
                format!("rename {} to {}", source.display(), dest.display()),
                e,
            )
        })?;
        info!(path = %dest.display(), "Artifact placed");
        Ok(())
    }

    async fn stage_package(&self, req: &FetchRequest, staged: &Path) -> FetchResult<()> {
        let package_ref = req.package.as_ref().ok_or_else(|| {
            FetchError::InvalidRequest("package fetch without a package reference".to_string())
        })?;
        let qualified = format!("{}/{}", package_ref.namespace, package_ref.name);

        let package = self
            .resources
            .get_package(&package_ref.namespace, &package_ref.name)
            .await
            .map_err(|e| FetchError::ResourceRetrieval {
                kind: "package",
                name: qualified.clone(),
                reason: e.to_string(),
            })?;

        let archive = if req.fetch_type == FetchType::Source {
            &package.spec.source
        } else {
            let status = package.status.build_status;
            if !status.deployment_ready() {
                return Err(FetchError::BuildNotReady {
                    package: qualified,
                    status: status.as_str().to_string(),
                });
            }
            &package.spec.deployment
        };

        if !archive.literal.is_empty() {
            write_private(staged, &archive.literal).await
        } else if !archive.url.is_empty() {
            let computed = self.download(&archive.url, staged).await?;
            let expected = archive.checksum.as_ref().ok_or_else(|| {
                FetchError::UnsupportedChecksum(format!("package {qualified} has no checksum"))
            })?;
            computed.verify(expected).map_err(|e| match e {
                parcel_core::Error::UnsupportedChecksumType(kind) => {
                    FetchError::UnsupportedChecksum(kind)
                }
                parcel_core::Error::ChecksumMismatch { expected, actual } => {
                    FetchError::ChecksumMismatch { expected, actual }
                }
                other => FetchError::InvalidRequest(other.to_string()),
            })
        } else if !archive.image.is_empty() {
            self.docker.download_final_layer(&archive.image, staged).await
        } else {
            Err(FetchError::NothingToFetch(qualified))
        }
    }

    /// Stream `url` into `path`, returning the checksum of what was written.
    async fn download(&self, url: &str, path: &Path) -> FetchResult<Checksum> {
        let download_err = |e: reqwest::Error| FetchError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| FetchError::io(format!("create {}", path.display()), e))?;
        let mut hasher = Checksum::hasher();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download_err)?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(format!("write {}", path.display()), e))?;
        }
        file.sync_all()
            .await
            .map_err(|e| FetchError::io(format!("sync {}", path.display()), e))?;
        Ok(hasher.finalize())
    }

    /// Unpack a recognised archive next to `dest`, returning the new rename
    /// source. Anything else is returned unchanged.
    async fn extract_if_archive(&self, staged: &Path, dest: &Path) -> FetchResult<PathBuf> {
        let probe = staged.to_path_buf();
        let kind = tokio::task::spawn_blocking(move || archive::detect(&probe))
            .await
            .map_err(|e| FetchError::Extraction(e.to_string()))?
            .map_err(|e| FetchError::io(format!("inspect {}", staged.display()), e))?;
        let Some(kind) = kind else {
            return Ok(staged.to_path_buf());
        };

        let parent = dest.parent().unwrap_or(&self.shared_volume);
        let target = parent.join(uuid::Uuid::new_v4().to_string());
        let (src, dst) = (staged.to_path_buf(), target.clone());
        tokio::task::spawn_blocking(move || archive::extract(kind, &src, &dst))
            .await
            .map_err(|e| FetchError::Extraction(e.to_string()))??;

        if let Err(e) = tokio::fs::remove_file(staged).await {
            warn!(path = %staged.display(), error = %e, "Failed to remove extracted archive");
        }
        info!(archive = ?kind, path = %target.display(), "Archive extracted");
        Ok(target)
    }

    /// Write every referenced secret and config map under its
    /// `{namespace}/{name}` directory, one file per key.
    pub async fn fetch_secrets_and_config_maps(
        &self,
        secrets: &[SecretReference],
        config_maps: &[ConfigMapReference],
    ) -> FetchResult<()> {
        for secret_ref in secrets {
            let qualified = format!("{}/{}", secret_ref.namespace, secret_ref.name);
            let secret = self
                .resources
                .get_secret(&secret_ref.namespace, &secret_ref.name)
                .await
                .map_err(|e| match e {
                    ResourceError::NotFound => FetchError::SecretNotFound(qualified.clone()),
                    ResourceError::Retrieval(reason) => FetchError::ResourceRetrieval {
                        kind: "secret",
                        name: qualified.clone(),
                        reason,
                    },
                })?;
            let values = secret
                .decoded()
                .map_err(|e| FetchError::ResourceRetrieval {
                    kind: "secret",
                    name: qualified.clone(),
                    reason: e.to_string(),
                })?;

            let dir = resource_dir(&self.secret_dir, &secret_ref.namespace, &secret_ref.name)?;
            for (key, value) in &values {
                write_private(&key_path(&dir, key)?, value).await?;
            }
            info!(secret = %qualified, keys = values.len(), "Secret materialized");
        }

        for map_ref in config_maps {
            let qualified = format!("{}/{}", map_ref.namespace, map_ref.name);
            let config_map = self
                .resources
                .get_configmap(&map_ref.namespace, &map_ref.name)
                .await
                .map_err(|e| match e {
                    ResourceError::NotFound => FetchError::ConfigMapNotFound(qualified.clone()),
                    ResourceError::Retrieval(reason) => FetchError::ResourceRetrieval {
                        kind: "configmap",
                        name: qualified.clone(),
                        reason,
                    },
                })?;

            let dir = resource_dir(&self.config_dir, &map_ref.namespace, &map_ref.name)?;
            for (key, value) in &config_map.data {
                write_private(&key_path(&dir, key)?, value.as_bytes()).await?;
            }
            info!(configmap = %qualified, keys = config_map.data.len(), "Config map materialized");
        }
        Ok(())
    }

    /// Package a shared-volume entry and push it to a storage service.
    pub async fn upload(&self, req: &ArchiveUploadRequest) -> FetchResult<ArchiveUploadResponse> {
        let started = Instant::now();
        let src = self.shared_volume_path(&req.filename)?;
        let dst = self.shared_volume.join(format!("{}.zip", req.filename));

        if req.archive_package {
            let (from, to) = (src.clone(), dst.clone());
            tokio::task::spawn_blocking(move || archive::zip_path(&from, &to))
                .await
                .map_err(|e| FetchError::Upload(e.to_string()))?
                .map_err(|e| FetchError::io(format!("archive {}", src.display()), e))?;
        } else {
            tokio::fs::rename(&src, &dst).await.map_err(|e| {
                FetchError::io(format!("rename {} to {}", src.display(), dst.display()), e)
            })?;
        }

        let client = StorageClient::new(self.http.clone(), &req.storage_svc_url);
        let uploaded = client
            .upload(&dst)
            .await
            .map_err(|e| FetchError::Upload(e.to_string()))?;

        info!(
            filename = %req.filename,
            archive = %uploaded.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upload request finished"
        );
        Ok(ArchiveUploadResponse {
            archive_download_url: client.download_url(&uploaded.id),
            checksum: uploaded.checksum,
        })
    }

    /// Fetch to the load path, materialize secrets and config maps, then
    /// tell the runtime to load the function.
    pub async fn specialize(&self, req: &SpecializeRequest) -> FetchResult<()> {
        let started = Instant::now();
        if req.load_req.filepath.is_empty() {
            return Err(FetchError::InvalidRequest(
                "load request has an empty filepath".to_string(),
            ));
        }

        self.fetch(&req.fetch_req, Path::new(&req.load_req.filepath))
            .await?;
        self.fetch_secrets_and_config_maps(&req.fetch_req.secrets, &req.fetch_req.config_maps)
            .await?;

        let call = SpecializeCall::for_load(&self.runtime_url, &req.load_req)
            .map_err(|source| FetchError::Specialize {
                attempts: 0,
                source,
            })?;
        let attempts = specialize_with_retry(self.transport.as_ref(), &call, self.retry)
            .await
            .map_err(|failure| FetchError::Specialize {
                attempts: failure.attempts,
                source: failure.error,
            })?;

        info!(
            function = %req.load_req.function_name,
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Specialize request finished"
        );
        Ok(())
    }

    fn shared_volume_path(&self, filename: &str) -> FetchResult<PathBuf> {
        if filename.is_empty() {
            return Err(FetchError::InvalidRequest(
                "request has an empty filename".to_string(),
            ));
        }
        if !is_single_component(filename) {
            return Err(FetchError::InvalidRequest(format!(
                "filename {filename} must be a plain name"
            )));
        }
        Ok(self.shared_volume.join(filename))
    }
}

fn tmp_sibling(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn resource_dir(root: &Path, namespace: &str, name: &str) -> FetchResult<PathBuf> {
    if !is_single_component(namespace) || !is_single_component(name) {
        return Err(FetchError::InvalidRequest(format!(
            "invalid resource reference {namespace}/{name}"
        )));
    }
    Ok(root.join(namespace).join(name))
}

fn key_path(dir: &Path, key: &str) -> FetchResult<PathBuf> {
    if !is_single_component(key) {
        return Err(FetchError::InvalidRequest(format!("invalid key {key}")));
    }
    Ok(dir.join(key))
}

/// Write `data` to `path` readable by the owner only, creating parents.
async fn write_private(path: &Path, data: &[u8]) -> FetchResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(format!("mkdir {}", parent.display()), e))?;
    }
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| FetchError::io(format!("create {}", path.display()), e))?;
    file.write_all(data)
        .await
        .map_err(|e| FetchError::io(format!("write {}", path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| FetchError::io(format!("flush {}", path.display()), e))
}
