//! Frame stream reader.
//!
//! Forwards a local port to the capture binary's socket, decodes the stream
//! with [`MinicapCodec`] and republishes frames on a small bounded queue.
//! Delivery never waits: when the consumer falls behind, new frames are
//! dropped, because a stale screen image is worth nothing and the socket
//! must keep draining.
//!
//! Failed connections are retried after a fixed pause against a budget
//! shared by the whole run.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReaderConfig;
use crate::device::{DeviceAgent, ForwardTarget};
use crate::error::{CaptureError, Result};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::{Banner, Frame, MinicapCodec, StreamItem};

const COMPONENT: &str = "reader";

// ── ReaderStats ──────────────────────────────────────────────────

/// Counters published while the reader runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames handed to the queue.
    pub frames_delivered: u64,
    /// Frames discarded because the queue was full.
    pub frames_dropped: u64,
    /// Payload bytes of delivered frames.
    pub bytes_delivered: u64,
    /// Connections that got past the dial.
    pub connections: u64,
    /// Connection attempts that ended in an error.
    pub failures: u64,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// ── FrameReader ──────────────────────────────────────────────────

/// Reads JPEG frames from the forwarded capture socket.
pub struct FrameReader {
    device: Arc<dyn DeviceAgent>,
    config: ReaderConfig,
    lifecycle: Lifecycle,
    worker: Mutex<Option<Worker>>,
    frames: Mutex<Option<mpsc::Receiver<Frame>>>,
    banner_tx: watch::Sender<Option<Banner>>,
    stats_tx: watch::Sender<ReaderStats>,
}

impl FrameReader {
    pub fn new(device: Arc<dyn DeviceAgent>, config: ReaderConfig) -> Self {
        let (banner_tx, _) = watch::channel(None);
        let (stats_tx, _) = watch::channel(ReaderStats::default());
        Self {
            device,
            config,
            lifecycle: Lifecycle::new(COMPONENT),
            worker: Mutex::new(None),
            frames: Mutex::new(None),
            banner_tx,
            stats_tx,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Forward to `target` and start reading in the background.
    ///
    /// Returns once forwarding is in place. Each start creates a fresh
    /// frame queue; collect it with [`take_frames`](Self::take_frames).
    pub async fn start(&self, target: ForwardTarget) -> Result<()> {
        let _guard = self.lifecycle.try_begin()?;
        self.lifecycle.begin_start()?;
        match self.spawn(target).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.lifecycle.finish(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop reading. Any open connection is closed.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.try_begin()?;
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if self.lifecycle.begin_stop() {
                worker.cancel.cancel();
            }
            if let Err(e) = worker.handle.await {
                self.lifecycle
                    .finish(Err(CaptureError::Other(format!("reader task aborted: {e}"))));
            }
        }
        self.lifecycle.wait().await
    }

    /// Terminal outcome of the most recent run.
    pub async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }

    /// Hand the current frame queue to the caller. `None` if it was
    /// already taken or the reader never started.
    pub async fn take_frames(&self) -> Option<mpsc::Receiver<Frame>> {
        self.frames.lock().await.take()
    }

    /// Banner of the most recent connection.
    pub fn banner(&self) -> watch::Receiver<Option<Banner>> {
        self.banner_tx.subscribe()
    }

    pub fn stats(&self) -> watch::Receiver<ReaderStats> {
        self.stats_tx.subscribe()
    }

    async fn spawn(&self, target: ForwardTarget) -> Result<()> {
        let addr = self.device.forward(&target).await?;
        info!(%target, %addr, "forwarded capture socket");

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        *self.frames.lock().await = Some(rx);
        self.banner_tx.send_replace(None);
        self.stats_tx.send_replace(ReaderStats::default());

        let cancel = CancellationToken::new();
        let session = ReadLoop {
            addr,
            config: self.config.clone(),
            frames: tx,
            banner: self.banner_tx.clone(),
            stats: self.stats_tx.clone(),
            cancel: cancel.clone(),
        };

        self.lifecycle.mark_running();
        let lifecycle = self.lifecycle.clone();
        let handle = tokio::spawn(async move {
            let outcome = session.run().await;
            lifecycle.finish(outcome);
        });
        *self.worker.lock().await = Some(Worker { cancel, handle });
        Ok(())
    }
}

// ── ReadLoop ─────────────────────────────────────────────────────

struct ReadLoop {
    addr: SocketAddr,
    config: ReaderConfig,
    frames: mpsc::Sender<Frame>,
    banner: watch::Sender<Option<Banner>>,
    stats: watch::Sender<ReaderStats>,
    cancel: CancellationToken,
}

impl ReadLoop {
    async fn run(self) -> Result<()> {
        let mut retries_left = self.config.max_retries;
        loop {
            // Cancelling drops the connection with the read future.
            let err = tokio::select! {
                err = self.read_connection() => err,
                _ = self.cancel.cancelled() => return Ok(()),
            };
            self.stats.send_modify(|s| s.failures += 1);
            warn!(addr = %self.addr, error = %err, retries_left, "capture stream failed");

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_backoff()) => {}
                _ = self.cancel.cancelled() => return Ok(()),
            }
            if retries_left == 0 {
                return Err(CaptureError::RetryBudgetExhausted {
                    retries: self.config.max_retries,
                    last: Box::new(err),
                });
            }
            retries_left -= 1;
        }
    }

    /// Read one connection until it fails. Always returns the failure.
    async fn read_connection(&self) -> CaptureError {
        let stream = match TcpStream::connect(self.addr).await {
            Ok(stream) => stream,
            Err(e) => return e.into(),
        };
        self.stats.send_modify(|s| s.connections += 1);

        let codec = MinicapCodec::new(self.config.max_frame_size);
        let mut items = FramedRead::new(stream, codec);
        while let Some(item) = items.next().await {
            match item {
                Ok(StreamItem::Banner(banner)) => {
                    debug!(?banner, "capture banner");
                    self.banner.send_replace(Some(banner));
                }
                Ok(StreamItem::Frame(frame)) => self.deliver(frame),
                Err(e) => return e,
            }
        }
        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "capture stream closed").into()
    }

    fn deliver(&self, frame: Frame) {
        let len = frame.len() as u64;
        match self.frames.try_send(frame) {
            Ok(()) => self.stats.send_modify(|s| {
                s.frames_delivered += 1;
                s.bytes_delivered += len;
            }),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.stats.send_modify(|s| s.frames_dropped += 1);
            }
        }
    }
}
