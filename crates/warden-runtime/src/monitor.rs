//! Continuous health monitoring.
//!
//! Polls the service manager at a fixed interval and yields only when
//! the observed condition changes, reducing event noise. The monitor
//! is policy-free: restart decisions belong to the orchestration
//! layer consuming the stream.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warden_core::ProcessState;

use crate::manager::ServiceManager;

/// One observed health condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// The service is ready and its transport health check passes.
    Healthy,
    /// The service is not serving; carries the lifecycle state at the
    /// time of observation.
    Unhealthy(ProcessState),
}

/// Emits [`HealthEvent`]s for one managed service.
pub struct HealthMonitor {
    manager: Arc<ServiceManager>,
    interval: Duration,
    cancel_token: CancellationToken,
}

impl HealthMonitor {
    #[must_use]
    pub const fn new(
        manager: Arc<ServiceManager>,
        check_interval: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            manager,
            interval: check_interval,
            cancel_token,
        }
    }

    /// Start monitoring and return a stream of health changes.
    ///
    /// The stream yields only when the condition changes, not on every
    /// check, and completes when the cancellation token fires.
    pub fn monitor(self) -> impl Stream<Item = HealthEvent> {
        let manager = self.manager;
        let cancel_token = self.cancel_token;
        let check_interval = self.interval;

        stream! {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut last: Option<HealthEvent> = None;

            debug!(service = %manager.config().name, "Starting health monitor");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = manager.status().await;
                        let event = if status.healthy {
                            HealthEvent::Healthy
                        } else {
                            HealthEvent::Unhealthy(status.state)
                        };

                        if last != Some(event) {
                            debug!(
                                service = %manager.config().name,
                                ?event,
                                ?last,
                                "Health status changed"
                            );
                            yield event;
                            last = Some(event);
                        }
                    }
                    () = cancel_token.cancelled() => {
                        debug!(service = %manager.config().name, "Health monitor cancelled");
                        break;
                    }
                }
            }
        }
    }
}
