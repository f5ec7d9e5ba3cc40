//! Raw text channel over a piped child's stdin/stdout.
//!
//! Interactive engines have no framing: the prompt goes in as a line,
//! the response comes back as free text. The response boundary is
//! detected heuristically, in priority order:
//! 1. an idle marker line (the engine's input prompt reappearing)
//! 2. a quiet period after the collection deadline has elapsed
//!
//! Post-deadline collection is bounded by a hard cap of a few quiet
//! periods, so a marker-less engine that never goes quiet still
//! cannot hold a request open indefinitely.
//!
//! Collected lines are cleaned of terminal escape sequences and
//! decoration lines (log prefixes, progress bars) before joining.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use warden_core::ports::GenerationChannel;
use warden_core::{ChannelError, GenerationRequest};

use crate::relay::OutputRelay;

/// Writable handle to the child's stdin, shareable with the manager
/// so a shutdown sentinel can be written outside a generation call.
pub type SharedStdin = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// Upper bound on post-deadline collection, in quiet periods. An
/// engine that streams forever with gaps shorter than the quiet period
/// would otherwise hold `submit` open indefinitely.
const COLLECTION_OVERRUN: u32 = 5;

/// Strip ANSI escape sequences from a line of terminal output.
fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").to_string()
}

/// Lines that are engine chatter rather than response text.
///
/// Log-style lines open with a bracketed tag; progress bars carry a
/// pipe separator. Both are dropped after ANSI stripping.
fn is_decoration(stripped: &str) -> bool {
    let trimmed = stripped.trim_start();
    trimmed.starts_with('[') || trimmed.contains('|')
}

/// Heuristic text channel over the supervised child's pipes.
pub struct TextPipeChannel {
    stdin: SharedStdin,
    relay: Arc<OutputRelay>,
    idle_marker: String,
    quiet_period: Duration,
    request_timeout: Duration,
}

impl TextPipeChannel {
    pub fn new(
        stdin: SharedStdin,
        relay: Arc<OutputRelay>,
        idle_marker: impl Into<String>,
        quiet_period: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            stdin,
            relay,
            idle_marker: idle_marker.into(),
            quiet_period,
            request_timeout,
        }
    }

    async fn write_prompt(&self, prompt: &str) -> Result<(), ChannelError> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("{prompt}\n").as_bytes())
            .await
            .map_err(ChannelError::failure)?;
        stdin.flush().await.map_err(ChannelError::failure)
    }
}

#[async_trait]
impl GenerationChannel for TextPipeChannel {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ChannelError> {
        // Anything still queued belongs to a previous exchange
        let stale = self.relay.drain().await;
        if stale > 0 {
            debug!(lines = stale, "Discarded stale output before prompt");
        }

        self.write_prompt(&request.prompt).await?;

        let deadline = Instant::now() + self.request_timeout;
        let hard_deadline = deadline + self.quiet_period * COLLECTION_OVERRUN;
        let mut collected: Vec<String> = Vec::new();

        loop {
            let now = Instant::now();
            if now >= hard_deadline {
                if collected.is_empty() {
                    return Err(ChannelError::Timeout);
                }
                debug!(lines = collected.len(), "Collection cap reached, accepting partial output");
                break;
            }
            let wait = if now < deadline {
                deadline - now
            } else {
                // Past the deadline: accept what we have once the
                // engine goes quiet, bounded by the hard cap
                self.quiet_period.min(hard_deadline - now)
            };

            match self.relay.next_line(wait).await {
                Some(line) => {
                    let stripped = strip_ansi(&line);
                    let trimmed = stripped.trim();

                    if trimmed == self.idle_marker {
                        debug!("Idle marker observed, response complete");
                        break;
                    }
                    if is_decoration(&stripped) {
                        trace!(line = %stripped, "Skipping decoration line");
                        continue;
                    }
                    collected.push(stripped);
                }
                None => {
                    if Instant::now() < deadline {
                        // Only reachable when the relay closed early
                        // (child died mid-request); pace the re-check
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        continue;
                    }
                    if collected.is_empty() {
                        return Err(ChannelError::Timeout);
                    }
                    debug!(lines = collected.len(), "Quiet period elapsed, accepting partial output");
                    break;
                }
            }
        }

        let text = collected.join("\n").trim().to_string();
        if text.is_empty() {
            return Err(ChannelError::failure("engine produced no response text"));
        }
        Ok(text)
    }
}
