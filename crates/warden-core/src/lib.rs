//! Domain types and port definitions for llm-warden.
//!
//! This crate holds everything the runtime and the orchestration layer
//! share: configuration records, the sampling-parameter model, the
//! process state machine, the error taxonomy, and the port traits the
//! runtime implements (`GenerationChannel`, `ReadinessProbe`,
//! `HealthCheck`). No OS or network code lives here.

pub mod config;
pub mod error;
pub mod params;
pub mod ports;
pub mod state;

pub use config::{
    Endpoint, HttpTransport, LaunchSpec, PipeTransport, ServiceConfig, SocketTransport, Transport,
};
pub use error::{ChannelError, GenerateError, SupervisorError};
pub use params::{GenerationRequest, GenerationResponse, SamplingDefaults, SamplingParams};
pub use ports::{GenerationChannel, HealthCheck, ReadinessProbe};
pub use state::{ProcessState, ServiceStatus};
