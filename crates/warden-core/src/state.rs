//! Process state machine and status snapshot.
//!
//! Exactly one [`ProcessState`] exists per service manager; state
//! transitions are the only mutator of the liveness-derived flags
//! reported in [`ServiceStatus`].

use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised service.
///
/// Transitions: `Stopped → Starting → Ready → Degraded → Stopping →
/// Stopped`. A failure during `Starting` drives straight back to
/// `Stopped` via a forced terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// No child process; nothing to clean up.
    Stopped,
    /// Child launched, readiness not yet observed.
    Starting,
    /// Child answered its readiness probe and accepts requests.
    Ready,
    /// Child was ready but a probe or liveness check has since failed.
    Degraded,
    /// Shutdown in progress; cleanup not yet confirmed.
    Stopping,
}

impl ProcessState {
    /// Whether requests are accepted in this state.
    #[must_use]
    pub const fn accepts_requests(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether a child process is believed to exist in this state.
    #[must_use]
    pub const fn has_child(&self) -> bool {
        !matches!(self, Self::Stopped)
    }

    /// The `(running, ready)` flags this state implies.
    #[must_use]
    pub const fn flags(&self) -> (bool, bool) {
        match self {
            Self::Stopped => (false, false),
            Self::Starting | Self::Degraded | Self::Stopping => (true, false),
            Self::Ready => (true, true),
        }
    }
}

/// Structured status snapshot exposed to the orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Current lifecycle state.
    pub state: ProcessState,
    /// Whether a child process is running.
    pub running: bool,
    /// Whether the service accepts requests.
    pub ready: bool,
    /// Result of the most recent health check.
    pub healthy: bool,
    /// Child process identifier, when one exists.
    pub pid: Option<u32>,
}

impl ServiceStatus {
    /// Snapshot for a service with no child process.
    #[must_use]
    pub const fn stopped() -> Self {
        Self {
            state: ProcessState::Stopped,
            running: false,
            ready: false,
            healthy: false,
            pid: None,
        }
    }
}
