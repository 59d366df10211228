//! Fetch the topmost layer of a container image and unpack it.

use crate::error::{FetchError, FetchResult};
use crate::tarextract;
use futures::TryStreamExt;
use oci_distribution::Reference;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use parcel_core::config::RegistryCredentials;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info};

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
                               application/vnd.oci.image.manifest.v1+json";

/// Registry domains that stand for Docker Hub.
const DOCKER_HUB_DOMAINS: [&str; 2] = ["docker.io", "index.docker.io"];

/// Where an image lives on its registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    /// Credential lookup key.
    pub domain: String,
    pub base_url: String,
    pub repository: String,
    /// Tag or digest.
    pub reference: String,
}

/// Pulls the last layer of an image and extracts it to a directory.
pub struct DockerBlobFetcher {
    client: reqwest::Client,
    default_registry_url: String,
    credentials: RwLock<HashMap<String, RegistryCredentials>>,
}

impl DockerBlobFetcher {
    pub fn new(client: reqwest::Client, default_registry_url: impl Into<String>) -> Self {
        Self {
            client,
            default_registry_url: default_registry_url
                .into()
                .trim_end_matches('/')
                .to_string(),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Use basic credentials for every request to `domain`.
    pub fn set_basic_auth_for_domain(
        &self,
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) {
        let creds = RegistryCredentials {
            username: username.into(),
            password: password.into(),
        };
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain.into(), creds);
    }

    fn credentials_for(&self, domain: &str) -> Option<RegistryCredentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
            .cloned()
    }

    /// Split an image reference into registry, repository and tag.
    ///
    /// Short names go to the default registry under `library/`; the tag
    /// defaults to `latest`.
    pub fn resolve(&self, image: &str) -> FetchResult<ImageLocation> {
        let parsed: Reference = image
            .parse()
            .map_err(|e| FetchError::Image(format!("invalid image reference {image}: {e}")))?;

        let domain = parsed.registry().to_string();
        let base_url = if DOCKER_HUB_DOMAINS.contains(&domain.as_str()) {
            self.default_registry_url.clone()
        } else {
            format!("https://{domain}")
        };
        let reference = parsed
            .digest()
            .or(parsed.tag())
            .unwrap_or("latest")
            .to_string();

        Ok(ImageLocation {
            domain,
            base_url,
            repository: parsed.repository().to_string(),
            reference,
        })
    }

    /// Download the topmost layer of `image` and extract it into `destination`.
    ///
    /// The blob is hashed as it streams into the extractor; a digest
    /// mismatch is reported once the stream has been fully consumed.
    pub async fn download_final_layer(&self, image: &str, destination: &Path) -> FetchResult<()> {
        let location = self.resolve(image)?;
        let mut session = RegistrySession::new(
            &self.client,
            location.domain.clone(),
            self.credentials_for(&location.domain),
        );

        let manifest_url = format!(
            "{}/v2/{}/manifests/{}",
            location.base_url, location.repository, location.reference
        );
        let manifest: OciImageManifest = session
            .get(&manifest_url, Some(MANIFEST_ACCEPT))
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Image(format!("invalid manifest for {image}: {e}")))?;

        let layer = manifest
            .layers
            .last()
            .ok_or_else(|| FetchError::Image(format!("image {image} has no layers")))?;
        let expected = ExpectedDigest::parse(layer)?;
        debug!(image, digest = %layer.digest, size = layer.size, "Selected final layer");

        let blob_url = format!(
            "{}/v2/{}/blobs/{}",
            location.base_url, location.repository, layer.digest
        );
        let response = session.get(&blob_url, None).await?;
        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let bridge = SyncIoBridge::new(StreamReader::new(stream));

        let dest: PathBuf = destination.to_path_buf();
        tokio::task::spawn_blocking(move || -> FetchResult<()> {
            std::fs::create_dir_all(&dest)
                .map_err(|e| FetchError::io(format!("mkdir {}", dest.display()), e))?;
            let mut reader = DigestReader::new(bridge);
            tarextract::extract_tar_gz(&mut reader, &dest)?;
            io::copy(&mut reader, &mut io::sink())
                .map_err(|e| FetchError::io("draining layer stream", e))?;
            expected.verify(reader.finish())
        })
        .await
        .map_err(|e| FetchError::Image(format!("layer extraction task failed: {e}")))??;

        info!(image, digest = %layer.digest, "Image layer extracted");
        Ok(())
    }
}

/// Auth state for a sequence of requests against one registry.
struct RegistrySession<'a> {
    client: &'a reqwest::Client,
    domain: String,
    credentials: Option<RegistryCredentials>,
    token: Option<String>,
}

impl<'a> RegistrySession<'a> {
    fn new(
        client: &'a reqwest::Client,
        domain: String,
        credentials: Option<RegistryCredentials>,
    ) -> Self {
        Self {
            client,
            domain,
            credentials,
            token: None,
        }
    }

    fn request(&self, url: &str, accept: Option<&str>) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        match (&self.token, &self.credentials) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some(creds)) => request.basic_auth(&creds.username, Some(&creds.password)),
            (None, None) => request,
        }
    }

    /// GET `url`, answering one bearer challenge if the registry asks.
    async fn get(&mut self, url: &str, accept: Option<&str>) -> FetchResult<reqwest::Response> {
        let response = self
            .request(url, accept)
            .send()
            .await
            .map_err(|e| FetchError::Image(format!("registry request to {url} failed: {e}")))?;

        if response.status() != StatusCode::UNAUTHORIZED || self.token.is_some() {
            return check_status(url, response).await;
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
            .ok_or_else(|| {
                FetchError::Image(format!("registry {} rejected credentials", self.domain))
            })?;
        self.token = Some(self.fetch_token(&challenge).await?);

        let response = self
            .request(url, accept)
            .send()
            .await
            .map_err(|e| FetchError::Image(format!("registry request to {url} failed: {e}")))?;
        check_status(url, response).await
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> FetchResult<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: Option<String>,
            #[serde(default)]
            access_token: Option<String>,
        }

        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }
        let mut request = self.client.get(&challenge.realm).query(&query);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Image(format!("token request failed: {e}")))?;
        let response = check_status(&challenge.realm, response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Image(format!("invalid token response: {e}")))?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::Image("token response carried no token".to_string()))
    }
}

async fn check_status(url: &str, response: reqwest::Response) -> FetchResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Image(format!(
        "GET {url} returned {status}: {}",
        body.trim()
    )))
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Split `k="v",k2=v2` on commas outside quotes.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in params.chars().chain(std::iter::once(',')) {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                if let Some((k, v)) = current.split_once('=') {
                    out.push((k.trim().to_string(), v.trim().to_string()));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    out
}

struct ExpectedDigest {
    raw: String,
    hex: String,
}

impl ExpectedDigest {
    fn parse(layer: &OciDescriptor) -> FetchResult<Self> {
        match layer.digest.split_once(':') {
            Some(("sha256", hex)) => Ok(Self {
                raw: layer.digest.clone(),
                hex: hex.to_ascii_lowercase(),
            }),
            _ => Err(FetchError::Image(format!(
                "unsupported layer digest {}",
                layer.digest
            ))),
        }
    }

    fn verify(&self, actual: String) -> FetchResult<()> {
        if actual == self.hex {
            Ok(())
        } else {
            Err(FetchError::ImageDigestMismatch(self.raw.clone()))
        }
    }
}

/// Hashes everything read through it.
struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> DigestReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        parcel_core::checksum::to_hex(&self.hasher.finalize())
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
