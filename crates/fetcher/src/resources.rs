//! Client for the resource API serving packages, secrets and config maps.

use async_trait::async_trait;
use parcel_core::{ConfigMap, Package, Secret};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Retrieval(String),
}

impl ResourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Read access to namespaced resources.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get_package(&self, namespace: &str, name: &str) -> Result<Package, ResourceError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ResourceError>;

    async fn get_configmap(&self, namespace: &str, name: &str)
    -> Result<ConfigMap, ResourceError>;
}

/// [`ResourceClient`] over the resource API's JSON endpoints.
#[derive(Clone)]
pub struct HttpResourceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, namespace: &str, kind: &str, name: &str) -> String {
        use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
        format!(
            "{}/v1/namespaces/{}/{}/{}",
            self.base_url,
            utf8_percent_encode(namespace, NON_ALPHANUMERIC),
            kind,
            utf8_percent_encode(name, NON_ALPHANUMERIC),
        )
    }

    async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<T, ResourceError> {
        let url = self.url(namespace, kind, name);
        debug!(url = %url, "Fetching resource");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResourceError::Retrieval(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ResourceError::NotFound),
            status if !status.is_success() => Err(ResourceError::Retrieval(format!(
                "resource API returned {status}"
            ))),
            _ => response
                .json::<T>()
                .await
                .map_err(|e| ResourceError::Retrieval(format!("invalid response: {e}"))),
        }
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn get_package(&self, namespace: &str, name: &str) -> Result<Package, ResourceError> {
        self.get(namespace, "packages", name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ResourceError> {
        self.get(namespace, "secrets", name).await
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, ResourceError> {
        self.get(namespace, "configmaps", name).await
    }
}
