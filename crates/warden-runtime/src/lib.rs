//! Process supervision and IPC runtime for llm-warden.
//!
//! Implements the ports defined in `warden-core`: process lifecycle
//! (spawn, readiness, graceful shutdown with signal escalation, PID
//! file bookkeeping), the two generation transports (framed JSON
//! socket and heuristic text pipe), transport health checks, and a
//! change-driven health monitor stream.
//!
//! The usual entry point is [`ServiceManager`], which composes all of
//! the above for one configured service.

#![deny(unsafe_code)]

pub mod channel;
pub mod health;
pub mod manager;
pub mod monitor;
pub mod pidfile;
pub mod probe;
mod relay;
pub mod shutdown;
pub mod supervisor;

// Re-export the composed manager, the usual entry point
pub use manager::ServiceManager;

// Re-export transport building blocks for direct use
pub use channel::{FramedSocketChannel, SharedStdin, TextPipeChannel};
pub use health::{EndpointHealth, HttpHealth, LivenessOnly, can_connect, check_http_health};
pub use monitor::{HealthEvent, HealthMonitor};
pub use probe::{ConnectivityProbe, HttpReadyProbe, PatternProbe};
pub use relay::OutputRelay;
pub use supervisor::{LaunchIo, ProcessSupervisor, StdioMode};
