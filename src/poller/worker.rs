//! Poll worker
//!
//! One worker per camera. Owns the long-lived upstream connection, decodes
//! and re-encodes frames, and keeps the latest JPEG behind its lock for
//! handlers to copy out.

use super::frame::{self, FrameAssembler, MAX_FRAME_BUFFER_BYTES};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// HTTP/1 streaming endpoint format
const STREAM_ENDPOINT_FMT: &str = "http://{ip}:{port}/stream";

/// Transport-level read timeout on the upstream connection
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The worker dies when no frame decodes successfully within this window
const PROGRESS_DEADLINE: Duration = Duration::from_secs(1);

/// Latest decoded frame for one camera
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// JPEG bytes; empty until the first successful frame
    pub data: Vec<u8>,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
}

/// Poll worker for a single camera
pub struct PollWorker {
    ip: String,
    name: String,
    endpoint: String,
    latest: RwLock<FrameSnapshot>,
    running: AtomicBool,
    cancel: CancellationToken,
    client: reqwest::Client,
}

impl PollWorker {
    /// Create a worker for the camera at `ip:port`.
    ///
    /// `cancel` is the worker's own token, derived by the supervisor from
    /// its token; process shutdown propagates through the same hierarchy.
    pub fn new(ip: String, name: String, port: u16, cancel: CancellationToken) -> Self {
        let endpoint = STREAM_ENDPOINT_FMT
            .replace("{ip}", &ip)
            .replace("{port}", &port.to_string());

        let client = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_READ_TIMEOUT)
            .read_timeout(UPSTREAM_READ_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            ip,
            name,
            endpoint,
            latest: RwLock::new(FrameSnapshot {
                data: Vec::new(),
                captured_at: Utc::now(),
            }),
            running: AtomicBool::new(false),
            cancel,
            client,
        }
    }

    /// Camera IP; stable for the worker's lifetime
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Camera display name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Copy of the latest frame and its timestamp.
    ///
    /// Always returns a fresh buffer; the next frame swap may reuse the
    /// internal one.
    pub async fn snapshot(&self) -> FrameSnapshot {
        self.latest.read().await.clone()
    }

    /// Spin up the poll loop. Fails when the worker is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal(format!(
                "worker[{}] already running",
                self.endpoint
            )));
        }

        let worker = Arc::clone(self);
        tokio::spawn(worker.poll());
        Ok(())
    }

    /// The poll loop. Failures are not retried here; the supervisor
    /// observes `running == false` and restarts on its next tick.
    async fn poll(self: Arc<Self>) {
        let response = match self.client.get(&self.endpoint).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Upstream rejected stream request");
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
            },
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to establish upstream connection");
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        tracing::info!(endpoint = %self.endpoint, camera = %self.name, "Upstream connection established");

        let mut body = response.bytes_stream();
        let mut assembler = FrameAssembler::new(MAX_FRAME_BUFFER_BYTES);

        let deadline = tokio::time::sleep(PROGRESS_DEADLINE);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(endpoint = %self.endpoint, "Worker cancelled, terminating");
                    break;
                }
                _ = &mut deadline => {
                    tracing::warn!(endpoint = %self.endpoint, "Progress deadline exceeded, terminating");
                    break;
                }
                chunk = body.next() => {
                    let chunk = match chunk {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            tracing::warn!(endpoint = %self.endpoint, error = %e, "Upstream read failed");
                            break;
                        }
                        None => {
                            tracing::info!(endpoint = %self.endpoint, "Upstream closed the stream");
                            break;
                        }
                    };

                    assembler.extend(&chunk);
                    while let Some(raw) = assembler.next_frame() {
                        match frame::reencode_jpeg(&raw) {
                            Ok(jpeg) => {
                                let size = jpeg.len();
                                {
                                    let mut latest = self.latest.write().await;
                                    latest.data = jpeg;
                                    latest.captured_at = Utc::now();
                                }
                                tracing::trace!(endpoint = %self.endpoint, size = size, "Frame updated");
                                deadline
                                    .as_mut()
                                    .reset(tokio::time::Instant::now() + PROGRESS_DEADLINE);
                            }
                            // Partial or garbled frame: keep reading. The
                            // deadline is only re-armed on success.
                            Err(e) => {
                                tracing::trace!(endpoint = %self.endpoint, error = %e, "Frame decode failed");
                            }
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!(endpoint = %self.endpoint, "Worker terminated");
    }
}
