//! Error taxonomy for supervision and request exchange.
//!
//! Process-level failures force a state transition and resource
//! cleanup before they are returned. Transport-level failures are
//! surfaced per-request and never retried inside the core; retry is an
//! orchestration-layer decision.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from launching and supervising the child process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The launch command's target script or binary is missing.
    /// Fatal, not retried.
    #[error("launch target not found: {0}")]
    MissingLaunchTarget(PathBuf),

    /// The OS refused to spawn the child.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// The child exited before signalling readiness.
    #[error("process exited during startup (exit code {code:?})")]
    PrematureExit {
        /// Exit code when the child exited normally.
        code: Option<i32>,
    },

    /// The child never signalled ready within the startup timeout.
    #[error("process did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// Filesystem or pipe error while managing the child.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from one request/response exchange.
///
/// Connect, write, read, and parse failures all collapse into the
/// single `Failure` kind carrying the underlying cause; callers do not
/// distinguish sub-causes. Timeouts are kept separate so the manager
/// can report them as such.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No response within the per-request budget.
    #[error("request timed out")]
    Timeout,

    /// Any other transport failure.
    #[error("channel failure: {0}")]
    Failure(String),
}

impl ChannelError {
    /// Wrap an underlying cause as a channel failure.
    pub fn failure(cause: impl std::fmt::Display) -> Self {
        Self::Failure(cause.to_string())
    }
}

/// Errors surfaced to callers of `generate`.
///
/// `NotReady` means the request was rejected fast with no I/O
/// attempted; `Failed` means I/O was attempted and failed.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The service is not in the `Ready` state.
    #[error("service is not ready")]
    NotReady,

    /// The service exposes no generation channel (tokenizer sidecar).
    #[error("service has no generation channel")]
    NoChannel,

    /// The exchange was attempted and failed.
    #[error("generation failed: {0}")]
    Failed(#[from] ChannelError),
}
