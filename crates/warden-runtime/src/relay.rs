//! Background output relay for pipe-supervised children (non-UTF8-safe).
//!
//! Engines built on C/C++ tooling can emit non-UTF8 bytes on stdout.
//! Using `BufReader::lines()` would terminate the reader task on
//! invalid UTF-8, so lines are read as bytes and decoded lossily.
//!
//! The relay drains the child's stdout into a durable log file and a
//! bounded in-memory queue consumed by the readiness probe and the
//! pipe channel. The queue is FIFO, consumed at most once, and
//! drainable on demand so stale lines from an abandoned exchange never
//! leak into the next response.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bounded FIFO of child output lines with an explicit drain operation.
pub struct OutputRelay {
    rx: Mutex<mpsc::Receiver<String>>,
    cancel: CancellationToken,
}

impl OutputRelay {
    /// Spawn a reader task draining `stream` into the queue and,
    /// when configured, appending each line to `log_file`.
    pub fn spawn(
        stream: impl AsyncRead + Unpin + Send + 'static,
        log_file: Option<PathBuf>,
        capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut log = match &log_file {
                Some(path) => {
                    match tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .await
                    {
                        Ok(file) => Some(file),
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "Cannot open relay log file");
                            None
                        }
                    }
                }
                None => None,
            };

            let mut reader = BufReader::new(stream);
            let mut buf: Vec<u8> = Vec::with_capacity(1024);

            loop {
                buf.clear();
                let read = tokio::select! {
                    r = reader.read_until(b'\n', &mut buf) => r,
                    () = task_cancel.cancelled() => break,
                };

                match read {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        // Trim trailing newline(s)
                        if buf.last() == Some(&b'\n') {
                            buf.pop();
                            if buf.last() == Some(&b'\r') {
                                buf.pop();
                            }
                        }

                        let line = String::from_utf8_lossy(&buf).to_string();

                        let mut sink_failed = false;
                        if let Some(ref mut file) = log {
                            let write = async {
                                file.write_all(format!("{line}\n").as_bytes()).await?;
                                file.flush().await
                            };
                            if let Err(e) = write.await {
                                debug!(error = %e, "Relay log write failed, disabling sink");
                                sink_failed = true;
                            }
                        }
                        if sink_failed {
                            log = None;
                        }

                        // Bounded queue: when the consumer lags, drop the
                        // newest line rather than block the reader
                        if let Err(mpsc::error::TrySendError::Full(dropped)) = tx.try_send(line) {
                            debug!(line = %dropped, "Output queue full, dropping line");
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Relay reader exiting due to read error");
                        break;
                    }
                }
            }

            debug!("Output relay task exiting");
        });

        Arc::new(Self {
            rx: Mutex::new(rx),
            cancel,
        })
    }

    /// Wait up to `wait` for the next queued line.
    pub async fn next_line(&self, wait: Duration) -> Option<String> {
        let mut rx = self.rx.lock().await;
        timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Take the next line only if one is already queued.
    pub async fn try_next_line(&self) -> Option<String> {
        self.rx.lock().await.try_recv().ok()
    }

    /// Discard all currently queued lines, returning how many were dropped.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Stop the reader task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn relays_lines_in_arrival_order() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let relay = OutputRelay::spawn(reader, None, 16);

        writer.write_all(b"first\nsecond\r\n").await.unwrap();

        assert_eq!(
            relay.next_line(Duration::from_secs(1)).await.as_deref(),
            Some("first")
        );
        assert_eq!(
            relay.next_line(Duration::from_secs(1)).await.as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn drain_discards_queued_lines() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let relay = OutputRelay::spawn(reader, None, 16);

        writer.write_all(b"stale one\nstale two\n").await.unwrap();
        // Give the reader task a chance to enqueue both
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(relay.drain().await, 2);
        assert_eq!(relay.try_next_line().await, None);

        writer.write_all(b"fresh\n").await.unwrap();
        assert_eq!(
            relay.next_line(Duration::from_secs(1)).await.as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn next_line_times_out_when_idle() {
        let (_writer, reader) = tokio::io::duplex(256);
        let relay = OutputRelay::spawn(reader, None, 16);

        assert_eq!(relay.next_line(Duration::from_millis(50)).await, None);
    }

    #[tokio::test]
    async fn decodes_invalid_utf8_lossily() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let relay = OutputRelay::spawn(reader, None, 16);

        writer.write_all(b"ok \xff\xfe bytes\n").await.unwrap();
        let line = relay.next_line(Duration::from_secs(1)).await.unwrap();
        assert!(line.starts_with("ok "));
        assert!(line.ends_with(" bytes"));
    }

    #[tokio::test]
    async fn appends_lines_to_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("engine.log");

        let (mut writer, reader) = tokio::io::duplex(256);
        let relay = OutputRelay::spawn(reader, Some(log.clone()), 16);

        writer.write_all(b"logged line\n").await.unwrap();
        assert!(relay.next_line(Duration::from_secs(1)).await.is_some());
        // The log write happens before the enqueue, but give the fs a beat
        tokio::time::sleep(Duration::from_millis(50)).await;

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("logged line"));
    }
}
