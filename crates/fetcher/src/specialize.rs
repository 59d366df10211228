//! Runtime specialization handshake with classified retry.
//!
//! Only a refused or failed connection is worth retrying: the runtime is
//! most likely still starting. Any HTTP response, including a 5xx, is a
//! definitive answer and ends the handshake immediately.

use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::LoadRequest;
use parcel_core::config::RetryConfig;
use std::time::Duration;
use tracing::{info, warn};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    TransientConnection,
    Permanent,
}

#[derive(Debug, thiserror::Error)]
pub enum SpecializeError {
    #[error("connection to runtime failed: {0}")]
    Connect(String),

    #[error("request to runtime failed: {0}")]
    Request(String),

    #[error("runtime responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode load request: {0}")]
    Encode(String),
}

impl SpecializeError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Connect(_) => FailureClass::TransientConnection,
            Self::Request(_) | Self::Status { .. } | Self::Encode(_) => FailureClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for SpecializeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// One POST to the runtime's specialize endpoint.
#[derive(Debug, Clone)]
pub struct SpecializeCall {
    pub url: String,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl SpecializeCall {
    /// Pick the endpoint for the load request's environment version.
    ///
    /// Version 2 and later receive the JSON load request at `/v2/specialize`;
    /// older runtimes get an empty text body at `/specialize`.
    pub fn for_load(runtime_url: &str, load: &LoadRequest) -> Result<Self, SpecializeError> {
        let base = runtime_url.trim_end_matches('/');
        if load.env_version >= 2 {
            let body =
                serde_json::to_vec(load).map_err(|e| SpecializeError::Encode(e.to_string()))?;
            Ok(Self {
                url: format!("{base}/v2/specialize"),
                content_type: "application/json",
                body: Bytes::from(body),
            })
        } else {
            Ok(Self {
                url: format!("{base}/specialize"),
                content_type: "text/plain",
                body: Bytes::new(),
            })
        }
    }
}

/// Delivers a specialize call to the runtime.
#[async_trait]
pub trait SpecializeTransport: Send + Sync {
    async fn send(&self, call: &SpecializeCall) -> Result<(), SpecializeError>;
}

/// Transport over HTTP.
#[derive(Clone, Default)]
pub struct HttpSpecializeTransport {
    client: reqwest::Client,
}

impl HttpSpecializeTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpecializeTransport for HttpSpecializeTransport {
    async fn send(&self, call: &SpecializeCall) -> Result<(), SpecializeError> {
        let response = self
            .client
            .post(&call.url)
            .header(reqwest::header::CONTENT_TYPE, call.content_type)
            .body(call.body.clone())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() < 300 {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SpecializeError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Bounded retry with linearly growing delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

/// Outcome of a failed handshake.
#[derive(Debug)]
pub struct SpecializeFailure {
    pub attempts: u32,
    pub error: SpecializeError,
}

/// Run the handshake, retrying transient connection failures.
///
/// Returns the number of attempts made on success. When the budget runs out
/// the last transient error is returned.
pub async fn specialize_with_retry(
    transport: &dyn SpecializeTransport,
    call: &SpecializeCall,
    policy: RetryPolicy,
) -> Result<u32, SpecializeFailure> {
    let mut attempt = 0;
    loop {
        let error = match transport.send(call).await {
            Ok(()) => {
                info!(url = %call.url, attempts = attempt + 1, "Specialize request done");
                return Ok(attempt + 1);
            }
            Err(e) => e,
        };

        let attempts = attempt + 1;
        if error.class() == FailureClass::Permanent || attempts >= policy.max_attempts {
            return Err(SpecializeFailure { attempts, error });
        }

        let delay = policy.delay(attempt);
        warn!(
            url = %call.url,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Runtime not reachable yet, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
