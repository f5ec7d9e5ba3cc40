//! Service manager: one supervised child, one transport, one state.
//!
//! The manager composes the supervisor with the transport-specific
//! probe, channel, and health check selected by configuration. All
//! lifecycle operations serialize on the supervisor lock; `status` and
//! `is_healthy` use `try_lock` so they stay responsive while a start
//! or stop is in flight.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use warden_core::ports::{GenerationChannel, HealthCheck};
use warden_core::{
    GenerateError, GenerationRequest, ProcessState, SamplingParams, ServiceConfig, ServiceStatus,
    SupervisorError, Transport,
};

use crate::channel::{FramedSocketChannel, SharedStdin, TextPipeChannel};
use crate::health::{EndpointHealth, HttpHealth, LivenessOnly};
use crate::pidfile::read_pidfile;
use crate::probe::{ConnectivityProbe, HttpReadyProbe, PatternProbe};
use crate::relay::OutputRelay;
use crate::supervisor::{ProcessSupervisor, StdioMode};

/// How long a pipe engine gets to exit on its own after the shutdown
/// sentinel, before the signal ladder takes over.
const SENTINEL_WAIT: Duration = Duration::from_millis(300);

/// Manages the full lifecycle of one supervised service.
pub struct ServiceManager {
    config: ServiceConfig,
    supervisor: Mutex<ProcessSupervisor>,
    state: StdMutex<ProcessState>,
    channel: StdMutex<Option<Arc<dyn GenerationChannel>>>,
    health: StdMutex<Option<Arc<dyn HealthCheck>>>,
    relay: StdMutex<Option<Arc<OutputRelay>>>,
    stdin: StdMutex<Option<SharedStdin>>,
    // At most one exchange in flight per service
    gen_gate: Mutex<()>,
}

impl ServiceManager {
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        let supervisor = ProcessSupervisor::new(&config);
        Self {
            config,
            supervisor: Mutex::new(supervisor),
            state: StdMutex::new(ProcessState::Stopped),
            channel: StdMutex::new(None),
            health: StdMutex::new(None),
            relay: StdMutex::new(None),
            stdin: StdMutex::new(None),
            gen_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn state(&self) -> ProcessState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock().unwrap() = state;
    }

    /// Drop transport resources; stops the relay reader if one runs.
    fn clear_transport(&self) {
        if let Some(relay) = self.relay.lock().unwrap().take() {
            relay.shutdown();
        }
        self.channel.lock().unwrap().take();
        self.health.lock().unwrap().take();
        self.stdin.lock().unwrap().take();
    }

    /// Start the service and wait until it is ready.
    ///
    /// Returns `Ok(true)` once the service is ready; calling on an
    /// already-ready service is a no-op. A startup failure tears the
    /// child down and leaves the service stopped.
    pub async fn start(&self) -> Result<bool, SupervisorError> {
        let mut supervisor = self.supervisor.lock().await;
        if self.state() == ProcessState::Ready && supervisor.is_alive() {
            debug!(service = %self.config.name, "Already running, start is a no-op");
            return Ok(true);
        }

        info!(service = %self.config.name, "Starting service");
        self.set_state(ProcessState::Starting);

        match self.launch_and_ready(&mut supervisor).await {
            Ok(()) => {
                self.set_state(ProcessState::Ready);
                info!(service = %self.config.name, pid = ?supervisor.pid(), "Service ready");
                Ok(true)
            }
            Err(e) => {
                self.clear_transport();
                self.set_state(ProcessState::Stopped);
                Err(e)
            }
        }
    }

    async fn launch_and_ready(
        &self,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<(), SupervisorError> {
        match self.config.transport.clone() {
            Transport::Socket(socket) => {
                supervisor.launch(StdioMode::Redirect).await?;
                let probe = ConnectivityProbe::new(
                    socket.endpoint.clone(),
                    socket.connect_timeout,
                    Some(self.config.log_file.clone()),
                    socket.ready_patterns,
                );
                supervisor.await_ready(&probe).await?;

                *self.channel.lock().unwrap() = Some(Arc::new(FramedSocketChannel::new(
                    socket.endpoint.clone(),
                    socket.connect_timeout,
                    self.config.request_timeout,
                )));
                *self.health.lock().unwrap() =
                    Some(Arc::new(EndpointHealth::new(socket.endpoint, socket.connect_timeout)));
            }
            Transport::Pipe(pipe) => {
                let io = supervisor.launch(StdioMode::Piped).await?;
                let stdout = io.stdout.ok_or_else(|| {
                    SupervisorError::SpawnFailed("child stdout not captured".to_string())
                })?;
                let stdin_pipe = io.stdin.ok_or_else(|| {
                    SupervisorError::SpawnFailed("child stdin not captured".to_string())
                })?;

                let relay = OutputRelay::spawn(
                    stdout,
                    Some(self.config.log_file.clone()),
                    pipe.queue_capacity,
                );
                let boxed: Box<dyn tokio::io::AsyncWrite + Send + Unpin> = Box::new(stdin_pipe);
                let stdin: SharedStdin = Arc::new(Mutex::new(boxed));

                let probe =
                    PatternProbe::new(relay.clone(), pipe.ready_pattern.clone(), pipe.ready_settle);
                if let Err(e) = supervisor.await_ready(&probe).await {
                    relay.shutdown();
                    return Err(e);
                }

                *self.channel.lock().unwrap() = Some(Arc::new(TextPipeChannel::new(
                    stdin.clone(),
                    relay.clone(),
                    pipe.idle_marker.clone(),
                    pipe.quiet_period,
                    self.config.request_timeout,
                )));
                *self.health.lock().unwrap() = Some(Arc::new(LivenessOnly));
                *self.relay.lock().unwrap() = Some(relay);
                *self.stdin.lock().unwrap() = Some(stdin);
            }
            Transport::Http(http) => {
                supervisor.launch(StdioMode::Redirect).await?;
                let probe = HttpReadyProbe::new(http.base_url());
                supervisor.await_ready(&probe).await?;

                // No generation channel; the sidecar is health-only
                *self.health.lock().unwrap() = Some(Arc::new(HttpHealth::new(http.base_url())));
            }
        }
        Ok(())
    }

    /// Stop the service, escalating from cooperative shutdown to
    /// signals. Idempotent when already stopped.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut supervisor = self.supervisor.lock().await;
        if self.state() == ProcessState::Stopped && !supervisor.is_alive() {
            debug!(service = %self.config.name, "Already stopped, stop is a no-op");
            return Ok(());
        }

        info!(service = %self.config.name, "Stopping service");
        self.set_state(ProcessState::Stopping);

        // Cooperative phase for pipe engines: write the sentinel and
        // give the child a moment to exit cleanly
        if let Transport::Pipe(pipe) = &self.config.transport
            && let Some(sentinel) = &pipe.shutdown_sentinel
        {
            let stdin = self.stdin.lock().unwrap().clone();
            if let Some(stdin) = stdin {
                let mut guard = stdin.lock().await;
                if guard
                    .write_all(format!("{sentinel}\n").as_bytes())
                    .await
                    .is_ok()
                {
                    let _ = guard.flush().await;
                    drop(guard);
                    sleep(SENTINEL_WAIT).await;
                }
            }
        }

        self.clear_transport();

        // The supervisor removes PID and socket files and applies the
        // settle delay on every terminate path
        if let Err(e) = supervisor.terminate().await {
            // Cleanup incomplete; the child may still exist. Degraded
            // keeps the service operable: stop can be retried
            self.set_state(ProcessState::Degraded);
            return Err(e);
        }

        self.set_state(ProcessState::Stopped);
        info!(service = %self.config.name, "Service stopped");
        Ok(())
    }

    /// Stop, pause, and start again.
    pub async fn restart(&self) -> Result<bool, SupervisorError> {
        self.stop().await?;
        sleep(self.config.restart_pause).await;
        self.start().await
    }

    /// Submit one generation request.
    ///
    /// Rejected immediately with [`GenerateError::NotReady`] when the
    /// service is not ready; no transport I/O is attempted. Unset
    /// sampling parameters are filled from the configured defaults.
    pub async fn generate(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, GenerateError> {
        if !self.state().accepts_requests() {
            return Err(GenerateError::NotReady);
        }
        let channel = self
            .channel
            .lock()
            .unwrap()
            .clone()
            .ok_or(GenerateError::NoChannel)?;

        let request = GenerationRequest::new(prompt, params.or_defaults(&self.config.sampling));

        let _gate = self.gen_gate.lock().await;
        let text = channel.submit(&request).await?;
        Ok(text)
    }

    /// Liveness plus the transport health signal.
    pub async fn is_healthy(&self) -> bool {
        if !self.state().accepts_requests() {
            return false;
        }

        let alive = match self.supervisor.try_lock() {
            Ok(mut supervisor) => supervisor.is_alive(),
            // A lifecycle operation holds the lock; the state flag is
            // the best answer available without stalling
            Err(_) => true,
        };
        if !alive {
            self.note_child_gone(ProcessState::Degraded);
            return false;
        }

        let health = self.health.lock().unwrap().clone();
        match health {
            Some(check) => check.check().await,
            None => true,
        }
    }

    /// Structured status snapshot.
    ///
    /// Detects a child that died behind the manager's back and corrects
    /// the recorded state before reporting.
    pub async fn status(&self) -> ServiceStatus {
        let mut state = self.state();

        let pid = match self.supervisor.try_lock() {
            Ok(mut supervisor) => {
                if state == ProcessState::Ready && !supervisor.is_alive() {
                    self.note_child_gone(ProcessState::Degraded);
                    state = ProcessState::Degraded;
                }
                supervisor.pid()
            }
            // start/stop in progress; report from the PID file
            Err(_) => read_pidfile(&self.config.pid_file).ok(),
        };

        let (running, ready) = state.flags();
        let healthy = if ready {
            let health = self.health.lock().unwrap().clone();
            match health {
                Some(check) => check.check().await,
                None => false,
            }
        } else {
            false
        };

        ServiceStatus {
            state,
            running,
            ready,
            healthy,
            pid,
        }
    }

    fn note_child_gone(&self, downgraded: ProcessState) {
        warn!(service = %self.config.name, state = ?downgraded, "Child process is gone");
        self.set_state(downgraded);
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ProcessState) {
        self.set_state(state);
    }

    #[cfg(test)]
    pub(crate) fn install_channel(&self, channel: Arc<dyn GenerationChannel>) {
        *self.channel.lock().unwrap() = Some(channel);
    }
}
