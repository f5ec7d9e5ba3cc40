//! Port traits implemented by the runtime.
//!
//! # Design Rules
//!
//! - Express **intent**, not implementation detail
//! - No transport concerns in signatures
//! - Must support test doubles (counting/recording fakes)

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::params::GenerationRequest;

/// Exchanges one request for one response with the running child.
///
/// Implementations are selected at configuration time: a framed
/// socket protocol or a raw text pipe. At most one exchange is in
/// flight per service; the manager serializes callers.
#[async_trait]
pub trait GenerationChannel: Send + Sync {
    /// Submit a request and wait for the reconstructed response text.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ChannelError>;
}

/// Decides whether a freshly launched child can serve requests.
///
/// The supervisor polls this at a fixed interval and re-checks child
/// liveness on every iteration itself; implementations only answer
/// "ready now?" and must be cheap enough to call repeatedly.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One readiness check. `true` once the child can serve requests.
    async fn poll(&self) -> bool;
}

/// Transport-specific health signal for an already-started service.
///
/// Liveness of the child process itself is the manager's job; this
/// trait adds the transport dimension (connectivity, HTTP health).
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// One health check. Must not disturb an engine mid-generation.
    async fn check(&self) -> bool;
}
