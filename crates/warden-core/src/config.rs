//! Service configuration records.
//!
//! These are intent-based records constructed by the embedding
//! application (YAML loading and validation stay outside the core).
//! They express what the caller wants supervised, not how the runtime
//! does it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::params::SamplingDefaults;

/// Where the engine's request/response listener lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP host and port.
    Tcp { host: String, port: u16 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// How to launch the child process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program or script to execute.
    pub program: PathBuf,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Create a launch spec for a program with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Append a program argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Framed-socket transport settings.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    /// Socket or TCP endpoint the engine listens on.
    pub endpoint: Endpoint,
    /// Per-connection connect timeout (independent of the request timeout).
    pub connect_timeout: Duration,
    /// Log phrases that signal successful initialization. When the log
    /// file exists, readiness requires one of these *and* a successful
    /// connect; with no log file, connectivity alone suffices.
    pub ready_patterns: Vec<String>,
}

impl SocketTransport {
    /// Create socket transport settings with default timeouts and patterns.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(2),
            ready_patterns: default_ready_patterns(),
        }
    }
}

/// Known engine initialization phrases.
fn default_ready_patterns() -> Vec<String> {
    [
        "LLM init ok",
        "Model loaded successfully",
        "Ready to accept requests",
        "Server listening",
    ]
    .map(String::from)
    .to_vec()
}

/// Text-pipe transport settings.
#[derive(Debug, Clone)]
pub struct PipeTransport {
    /// Line the engine prints when idle and awaiting input.
    pub idle_marker: String,
    /// Stdout phrase that signals successful initialization.
    pub ready_pattern: String,
    /// Settling delay applied after the ready pattern is observed, so
    /// the engine can flush its own idle prompt.
    pub ready_settle: Duration,
    /// Line written to stdin to request cooperative shutdown.
    /// `None` skips the cooperative write and goes straight to signals.
    pub shutdown_sentinel: Option<String>,
    /// Quiet gap after which a partial response is accepted once the
    /// request deadline has elapsed. Best-effort, see the channel docs.
    pub quiet_period: Duration,
    /// Capacity of the bounded output-line queue.
    pub queue_capacity: usize,
}

impl Default for PipeTransport {
    fn default() -> Self {
        Self {
            idle_marker: ">>".to_string(),
            ready_pattern: "LLM init ok".to_string(),
            ready_settle: Duration::from_millis(500),
            shutdown_sentinel: Some("/quit".to_string()),
            quiet_period: Duration::from_secs(2),
            queue_capacity: 1024,
        }
    }
}

/// HTTP transport settings (tokenizer sidecar).
///
/// The sidecar exposes no generation channel; readiness and health are
/// both observed through its `/health` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Host the sidecar binds.
    pub host: String,
    /// Port the sidecar binds.
    pub port: u16,
}

impl HttpTransport {
    /// Base URL of the sidecar.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Transport selected at configuration time, not negotiated.
#[derive(Debug, Clone)]
pub enum Transport {
    /// Newline-framed JSON over a Unix or TCP socket.
    Socket(SocketTransport),
    /// Raw text over the child's stdin/stdout.
    Pipe(PipeTransport),
    /// HTTP health endpoint only (no generation channel).
    Http(HttpTransport),
}

/// Everything one supervised service needs: launch command, transport,
/// on-disk artifacts, and timing knobs.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name used in logs and error messages.
    pub name: String,
    /// How to launch the child.
    pub launch: LaunchSpec,
    /// Request/response transport.
    pub transport: Transport,
    /// PID file recording the child's identity.
    pub pid_file: PathBuf,
    /// Durable log sink for child output.
    pub log_file: PathBuf,
    /// How long to wait for readiness after launch.
    pub startup_timeout: Duration,
    /// Per-request deadline for generation calls.
    pub request_timeout: Duration,
    /// Readiness polling interval.
    pub poll_interval: Duration,
    /// Grace period for cooperative shutdown before escalation.
    pub grace_period: Duration,
    /// Settling delay after termination, letting exclusive hardware
    /// locks release before a subsequent launch.
    pub settle_delay: Duration,
    /// Pause between stop and start during a restart.
    pub restart_pause: Duration,
    /// Defaults applied to unset sampling parameters.
    pub sampling: SamplingDefaults,
}

impl ServiceConfig {
    /// Create a service configuration with default timing knobs.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        launch: LaunchSpec,
        transport: Transport,
        pid_file: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            launch,
            transport,
            pid_file: pid_file.into(),
            log_file: log_file.into(),
            startup_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(15),
            settle_delay: Duration::from_millis(500),
            restart_pause: Duration::from_secs(2),
            sampling: SamplingDefaults::default(),
        }
    }

    /// Set the startup timeout.
    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the readiness polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the cooperative-shutdown grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the post-termination settle delay.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the restart pause.
    #[must_use]
    pub const fn with_restart_pause(mut self, pause: Duration) -> Self {
        self.restart_pause = pause;
        self
    }

    /// Set the sampling defaults.
    #[must_use]
    pub const fn with_sampling(mut self, sampling: SamplingDefaults) -> Self {
        self.sampling = sampling;
        self
    }

    /// Socket file owned by this service, if the transport uses one.
    #[must_use]
    pub fn socket_file(&self) -> Option<&PathBuf> {
        match &self.transport {
            Transport::Socket(SocketTransport {
                endpoint: Endpoint::Unix(path),
                ..
            }) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn endpoint_display() {
        let unix = Endpoint::Unix(PathBuf::from("/run/warden/engine.sock"));
        assert_eq!(unix.to_string(), "unix:/run/warden/engine.sock");

        let tcp = Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: 11411,
        };
        assert_eq!(tcp.to_string(), "127.0.0.1:11411");
    }

    #[test]
    fn socket_file_only_for_unix_socket_transport() {
        let launch = LaunchSpec::new("/opt/engine/run.sh");
        let sock = PathBuf::from("/run/warden/engine.sock");
        let cfg = ServiceConfig::new(
            "engine",
            launch.clone(),
            Transport::Socket(SocketTransport::new(Endpoint::Unix(sock.clone()))),
            "/run/warden/engine.pid",
            "/var/log/warden/engine.log",
        );
        assert_eq!(cfg.socket_file(), Some(&sock));

        let cfg = ServiceConfig::new(
            "engine",
            launch,
            Transport::Pipe(PipeTransport::default()),
            "/run/warden/engine.pid",
            "/var/log/warden/engine.log",
        );
        assert_eq!(cfg.socket_file(), None);
    }

    #[test]
    fn launch_spec_builder_accumulates() {
        let spec = LaunchSpec::new("/usr/bin/python3")
            .with_arg("tokenizer.py")
            .with_arg("--port")
            .with_arg("12345")
            .with_working_dir("/opt/models")
            .with_env("OMP_NUM_THREADS", "4");
        assert_eq!(spec.args.len(), 3);
        assert_eq!(spec.working_dir.as_deref(), Some(Path::new("/opt/models")));
        assert_eq!(spec.env[0].0, "OMP_NUM_THREADS");
    }
}
