//! Readiness probe implementations.
//!
//! Two strategies, selected by transport: a connectivity probe for
//! socket engines (optionally gated on log text, a defense against a
//! server that accepts connections before its weights are loaded) and
//! a stdout pattern probe for pipe engines. Child liveness is
//! re-checked by the supervisor on every poll iteration; a dead child
//! is failure, never a retry.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use warden_core::Endpoint;
use warden_core::ports::ReadinessProbe;

use crate::health::{can_connect, check_http_health};
use crate::relay::OutputRelay;

/// Readiness via a short-timeout connect, gated on log text when a
/// log file is present.
pub struct ConnectivityProbe {
    endpoint: Endpoint,
    connect_timeout: Duration,
    log_file: Option<PathBuf>,
    ready_patterns: Vec<String>,
}

impl ConnectivityProbe {
    pub fn new(
        endpoint: Endpoint,
        connect_timeout: Duration,
        log_file: Option<PathBuf>,
        ready_patterns: Vec<String>,
    ) -> Self {
        Self {
            endpoint,
            connect_timeout,
            log_file,
            ready_patterns,
        }
    }

    async fn log_gate_open(&self) -> bool {
        let Some(log) = &self.log_file else {
            return true;
        };
        if !log.exists() {
            // No log yet: connectivity alone decides
            return true;
        }
        let content = tokio::fs::read_to_string(log).await.unwrap_or_default();
        self.ready_patterns.iter().any(|p| content.contains(p))
    }
}

#[async_trait]
impl ReadinessProbe for ConnectivityProbe {
    async fn poll(&self) -> bool {
        if !self.log_gate_open().await {
            return false;
        }
        can_connect(&self.endpoint, self.connect_timeout).await
    }
}

/// Readiness via a known initialization phrase on the child's stdout.
///
/// After the phrase is observed a short settling delay is applied so
/// the child can flush its own idle prompt before the first request.
pub struct PatternProbe {
    relay: Arc<OutputRelay>,
    pattern: String,
    settle: Duration,
    matched: AtomicBool,
}

impl PatternProbe {
    pub fn new(relay: Arc<OutputRelay>, pattern: impl Into<String>, settle: Duration) -> Self {
        Self {
            relay,
            pattern: pattern.into(),
            settle,
            matched: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReadinessProbe for PatternProbe {
    async fn poll(&self) -> bool {
        if self.matched.load(Ordering::SeqCst) {
            return true;
        }

        while let Some(line) = self.relay.try_next_line().await {
            if line.contains(&self.pattern) {
                debug!(pattern = %self.pattern, "Initialization phrase observed");
                sleep(self.settle).await;
                self.matched.store(true, Ordering::SeqCst);
                return true;
            }
        }
        false
    }
}

/// Readiness via the sidecar's HTTP `/health` endpoint.
pub struct HttpReadyProbe {
    base_url: String,
}

impl HttpReadyProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadyProbe {
    async fn poll(&self) -> bool {
        check_http_health(&self.base_url).await.unwrap_or(false)
    }
}
