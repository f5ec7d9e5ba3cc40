//! Child process lifecycle: spawn, readiness wait, teardown.
//!
//! The supervisor owns the OS-level concerns (process group, stdio
//! wiring, PID file) and knows nothing about transports. Readiness is
//! delegated to a probe; a child that dies while the probe is polling
//! is a startup failure, never a retry.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use warden_core::ports::ReadinessProbe;
use warden_core::{LaunchSpec, ServiceConfig, SupervisorError};

use crate::pidfile::{delete_pidfile, discard_stale, write_pidfile};
use crate::shutdown::shutdown_child_group;

/// How the child's stdio is wired at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdout and stderr appended to the log file, stdin closed.
    /// For socket and HTTP engines that listen elsewhere.
    Redirect,
    /// stdin and stdout piped to the supervisor, stderr appended to
    /// the log file. For interactive text-pipe engines.
    Piped,
}

/// Pipe handles captured at spawn under [`StdioMode::Piped`].
#[derive(Debug)]
pub struct LaunchIo {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
}

/// Supervises exactly one child process at a time.
pub struct ProcessSupervisor {
    name: String,
    launch: LaunchSpec,
    pid_file: PathBuf,
    log_file: PathBuf,
    socket_file: Option<PathBuf>,
    startup_timeout: Duration,
    poll_interval: Duration,
    grace_period: Duration,
    settle_delay: Duration,
    child: Option<Child>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            name: config.name.clone(),
            launch: config.launch.clone(),
            pid_file: config.pid_file.clone(),
            log_file: config.log_file.clone(),
            socket_file: config.socket_file().cloned(),
            startup_timeout: config.startup_timeout,
            poll_interval: config.poll_interval,
            grace_period: config.grace_period,
            settle_delay: config.settle_delay,
            child: None,
        }
    }

    /// Spawn the child and record its PID file.
    ///
    /// Stale artifacts from a previous unclean exit are discarded
    /// first: the PID file (killing the recorded orphan if it is still
    /// alive) and the socket file, which would block the engine's bind.
    pub async fn launch(&mut self, mode: StdioMode) -> Result<LaunchIo, SupervisorError> {
        // A path-qualified target must exist before we try to spawn it;
        // bare program names are left to PATH lookup
        if self.launch.program.components().count() > 1 && !self.launch.program.exists() {
            return Err(SupervisorError::MissingLaunchTarget(
                self.launch.program.clone(),
            ));
        }

        discard_stale(&self.pid_file).await?;

        if let Some(socket) = &self.socket_file {
            if let Some(parent) = socket.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if socket.exists() {
                std::fs::remove_file(socket)?;
            }
        }

        if let Some(parent) = self.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_sink = || -> std::io::Result<std::fs::File> {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
        };

        let mut command = Command::new(&self.launch.program);
        command.args(&self.launch.args);
        if let Some(dir) = &self.launch.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.launch.env {
            command.env(key, value);
        }

        match mode {
            StdioMode::Redirect => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::from(log_sink()?))
                    .stderr(Stdio::from(log_sink()?));
            }
            StdioMode::Piped => {
                command
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::from(log_sink()?));
            }
        }

        // Own process group so shutdown can signal descendants too
        #[cfg(unix)]
        command.process_group(0);

        command.kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

        let pid = child.id().ok_or_else(|| {
            SupervisorError::SpawnFailed("child exited before PID could be read".to_string())
        })?;
        write_pidfile(&self.pid_file, pid)?;
        info!(service = %self.name, pid = %pid, "Process launched");

        let io = LaunchIo {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
        };
        self.child = Some(child);
        Ok(io)
    }

    /// Poll the probe until ready, the child dies, or the startup
    /// timeout elapses. Failure runs the full terminate cleanup
    /// before returning.
    pub async fn await_ready(
        &mut self,
        probe: &dyn ReadinessProbe,
    ) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + self.startup_timeout;

        loop {
            if let Some(code) = self.exited() {
                warn!(service = %self.name, code = ?code, "Process exited during startup");
                self.child = None;
                self.terminate().await?;
                return Err(SupervisorError::PrematureExit { code });
            }

            if probe.poll().await {
                info!(service = %self.name, "Process is ready");
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(service = %self.name, "Readiness timeout, terminating");
                self.terminate().await?;
                return Err(SupervisorError::ReadinessTimeout(self.startup_timeout));
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Exit code if the child has exited, `None` while it runs.
    ///
    /// Returns `Some(None)` for signal-terminated children.
    fn exited(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            // Treat a wait error as exited with unknown status
            Err(_) => Some(None),
        }
    }

    /// Whether the child is currently running.
    pub fn is_alive(&mut self) -> bool {
        self.child.is_some() && self.exited().is_none()
    }

    /// PID of the running child.
    pub fn pid(&mut self) -> Option<u32> {
        self.child.as_ref().and_then(tokio::process::Child::id)
    }

    /// Stop the child with the escalation ladder and remove its
    /// on-disk artifacts. Idempotent when no child is running.
    ///
    /// Regardless of which ladder step ends the child: the PID file is
    /// deleted, the socket file (if any) is unlinked, and a short
    /// settle delay runs so exclusive hardware locks release before a
    /// subsequent launch.
    pub async fn terminate(&mut self) -> Result<(), SupervisorError> {
        if let Some(child) = self.child.take() {
            let status = shutdown_child_group(child, self.grace_period).await?;
            debug!(service = %self.name, status = %status, "Process terminated");
        }
        delete_pidfile(&self.pid_file)?;
        if let Some(socket) = &self.socket_file
            && socket.exists()
        {
            // The engine cannot unlink its socket after SIGKILL
            std::fs::remove_file(socket)?;
        }
        sleep(self.settle_delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use warden_core::{Endpoint, PipeTransport, SocketTransport, Transport};

    struct AlwaysReady;

    #[async_trait]
    impl ReadinessProbe for AlwaysReady {
        async fn poll(&self) -> bool {
            true
        }
    }

    struct NeverReady {
        polls: AtomicU32,
    }

    #[async_trait]
    impl ReadinessProbe for NeverReady {
        async fn poll(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn config_in(dir: &TempDir, launch: LaunchSpec) -> ServiceConfig {
        transport_config_in(dir, launch, Transport::Pipe(PipeTransport::default()))
    }

    fn transport_config_in(
        dir: &TempDir,
        launch: LaunchSpec,
        transport: Transport,
    ) -> ServiceConfig {
        ServiceConfig::new(
            "test-engine",
            launch,
            transport,
            dir.path().join("engine.pid"),
            dir.path().join("engine.log"),
        )
        .with_startup_timeout(Duration::from_millis(500))
        .with_poll_interval(Duration::from_millis(50))
        .with_grace_period(Duration::from_secs(2))
        .with_settle_delay(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn launch_writes_pidfile_and_terminate_removes_it() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, LaunchSpec::new("sleep").with_arg("30"));
        let mut supervisor = ProcessSupervisor::new(&config);

        supervisor.launch(StdioMode::Redirect).await.unwrap();
        assert!(supervisor.is_alive());

        let pid = crate::pidfile::read_pidfile(&config.pid_file).unwrap();
        assert_eq!(Some(pid), supervisor.pid());

        supervisor.terminate().await.unwrap();
        assert!(!supervisor.is_alive());
        assert!(!config.pid_file.exists());
    }

    #[tokio::test]
    async fn missing_path_qualified_target_is_rejected_before_spawn() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, LaunchSpec::new("/nonexistent/engine/run.sh"));
        let mut supervisor = ProcessSupervisor::new(&config);

        let err = supervisor.launch(StdioMode::Redirect).await.unwrap_err();
        assert!(matches!(err, SupervisorError::MissingLaunchTarget(_)));
        assert!(!config.pid_file.exists());
    }

    #[tokio::test]
    async fn premature_exit_fails_readiness_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let config = config_in(
            &dir,
            LaunchSpec::new("sh").with_arg("-c").with_arg("exit 3"),
        );
        let mut supervisor = ProcessSupervisor::new(&config);

        supervisor.launch(StdioMode::Redirect).await.unwrap();
        // Let the child exit before the first liveness check
        sleep(Duration::from_millis(100)).await;

        let probe = NeverReady {
            polls: AtomicU32::new(0),
        };
        let err = supervisor.await_ready(&probe).await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::PrematureExit { code: Some(3) }
        ));
        assert!(!config.pid_file.exists());
    }

    #[tokio::test]
    async fn readiness_timeout_terminates_the_child() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, LaunchSpec::new("sleep").with_arg("30"));
        let mut supervisor = ProcessSupervisor::new(&config);

        supervisor.launch(StdioMode::Redirect).await.unwrap();

        let probe = NeverReady {
            polls: AtomicU32::new(0),
        };
        let err = supervisor.await_ready(&probe).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ReadinessTimeout(_)));
        assert!(probe.polls.load(Ordering::SeqCst) >= 1);
        assert!(!supervisor.is_alive());
        assert!(!config.pid_file.exists());
    }

    #[tokio::test]
    async fn await_ready_returns_once_probe_passes() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, LaunchSpec::new("sleep").with_arg("30"));
        let mut supervisor = ProcessSupervisor::new(&config);

        supervisor.launch(StdioMode::Redirect).await.unwrap();
        supervisor.await_ready(&AlwaysReady).await.unwrap();
        assert!(supervisor.is_alive());

        supervisor.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn launch_replaces_stale_pidfile() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, LaunchSpec::new("sleep").with_arg("30"));
        crate::pidfile::write_pidfile(&config.pid_file, 999_999).unwrap();

        let mut supervisor = ProcessSupervisor::new(&config);
        supervisor.launch(StdioMode::Redirect).await.unwrap();

        let recorded = crate::pidfile::read_pidfile(&config.pid_file).unwrap();
        assert_eq!(Some(recorded), supervisor.pid());

        supervisor.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn launch_creates_socket_parent_and_removes_stale_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("run").join("engine.sock");
        std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
        std::fs::write(&socket, "").unwrap();

        let nested = dir.path().join("fresh").join("sockets").join("engine.sock");
        let config = transport_config_in(
            &dir,
            LaunchSpec::new("sleep").with_arg("30"),
            Transport::Socket(SocketTransport::new(Endpoint::Unix(socket.clone()))),
        );
        let mut supervisor = ProcessSupervisor::new(&config);
        supervisor.launch(StdioMode::Redirect).await.unwrap();
        assert!(!socket.exists());
        supervisor.terminate().await.unwrap();

        let config = transport_config_in(
            &dir,
            LaunchSpec::new("sleep").with_arg("30"),
            Transport::Socket(SocketTransport::new(Endpoint::Unix(nested.clone()))),
        );
        let mut supervisor = ProcessSupervisor::new(&config);
        supervisor.launch(StdioMode::Redirect).await.unwrap();
        assert!(nested.parent().unwrap().is_dir());
        supervisor.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn readiness_timeout_unlinks_the_socket_file() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("engine.sock");
        let config = transport_config_in(
            &dir,
            LaunchSpec::new("sleep").with_arg("30"),
            Transport::Socket(SocketTransport::new(Endpoint::Unix(socket.clone()))),
        );
        let mut supervisor = ProcessSupervisor::new(&config);

        supervisor.launch(StdioMode::Redirect).await.unwrap();
        // Stand in for the engine binding its listener
        std::fs::write(&socket, "").unwrap();

        let probe = NeverReady {
            polls: AtomicU32::new(0),
        };
        let err = supervisor.await_ready(&probe).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ReadinessTimeout(_)));
        assert!(!config.pid_file.exists());
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn terminate_without_child_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, LaunchSpec::new("sleep"));
        let mut supervisor = ProcessSupervisor::new(&config);

        supervisor.terminate().await.unwrap();
        supervisor.terminate().await.unwrap();
    }
}
