//! Transport-level health checks.
//!
//! These are intentionally minimal and have no domain logic: one
//! connectivity check per call, one HTTP probe per call. Process
//! liveness is the manager's concern.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use warden_core::Endpoint;
use warden_core::ports::HealthCheck;

/// Attempt a short-timeout connect to the engine's listener.
///
/// Success means something is accepting connections there; it says
/// nothing about request handling.
pub async fn can_connect(endpoint: &Endpoint, connect_timeout: Duration) -> bool {
    match endpoint {
        Endpoint::Unix(path) => {
            #[cfg(unix)]
            {
                if !path.exists() {
                    return false;
                }
                matches!(
                    timeout(connect_timeout, tokio::net::UnixStream::connect(path)).await,
                    Ok(Ok(_))
                )
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                false
            }
        }
        Endpoint::Tcp { host, port } => {
            matches!(
                timeout(connect_timeout, TcpStream::connect((host.as_str(), *port))).await,
                Ok(Ok(_))
            )
        }
    }
}

/// Check HTTP health of a sidecar at the given base URL.
///
/// Makes a single request to the `/health` endpoint and returns
/// whether the server responded successfully.
pub async fn check_http_health(base_url: &str) -> Result<bool> {
    let health_url = format!("{base_url}/health");
    let client = Client::builder().timeout(Duration::from_secs(2)).build()?;

    match client.get(&health_url).send().await {
        Ok(response) if response.status().is_success() => Ok(true),
        Ok(response) => {
            debug!(status = %response.status(), "Health endpoint returned non-success");
            Ok(false)
        }
        Err(e) => {
            debug!(error = %e, "Health request failed");
            Ok(false)
        }
    }
}

/// Health check for the socket transport: a fresh connectivity probe.
pub struct EndpointHealth {
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl EndpointHealth {
    pub const fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for EndpointHealth {
    async fn check(&self) -> bool {
        can_connect(&self.endpoint, self.connect_timeout).await
    }
}

/// Health check for the pipe transport: liveness alone.
///
/// No implicit I/O is performed against an engine that might be
/// mid-generation; the manager's liveness check is the whole signal.
pub struct LivenessOnly;

#[async_trait]
impl HealthCheck for LivenessOnly {
    async fn check(&self) -> bool {
        true
    }
}

/// Health check for the tokenizer sidecar's HTTP endpoint.
pub struct HttpHealth {
    base_url: String,
}

impl HttpHealth {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HealthCheck for HttpHealth {
    async fn check(&self) -> bool {
        check_http_health(&self.base_url).await.unwrap_or(false)
    }
}
