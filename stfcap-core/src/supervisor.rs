//! Supervision of the capture binary running on the device.
//!
//! [`Supervisor::start`] installs the binary when needed, probes the device
//! and spawns a background loop that keeps one capture process alive:
//!
//! ```text
//!            ┌──────────── restart pending ◄── rotation / quality request
//!            ▼                                        │ (kill)
//!  kill strays ──► launch -P WxH@MWxMH/R ──► watch control stream
//!                                              │
//!                    no restart pending ◄──────┘ stream ended
//!                    => terminal error
//! ```
//!
//! Geometry lives inside the loop. Callers reach it only through the
//! control channel, one request per restart cycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SupervisorConfig;
use crate::device::artifacts::{binary_path, library_path};
use crate::device::{ArtifactSource, DeviceAgent};
use crate::error::{CaptureError, Result};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::{CaptureInfo, QualityTier, SessionGeometry};

const COMPONENT: &str = "supervisor";
const ABI_PROPERTY: &str = "ro.product.cpu.abi";
const SDK_PROPERTY: &str = "ro.build.version.sdk";

// ── BinaryVariant / Provisioned ──────────────────────────────────

/// Which capture executable a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryVariant {
    /// Pushed on demand, serves an abstract socket.
    Fast,
    /// Preinstalled, serves a device TCP port.
    Slow,
}

/// Result of a successful start.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub variant: BinaryVariant,
    /// Remote path of the executable.
    pub binary: String,
    pub info: CaptureInfo,
}

// ── Control requests ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum ControlKind {
    Rotate(u32),
    Quality(QualityTier),
}

/// A request is applied only if its sender is still waiting on `ack`.
struct ControlRequest {
    kind: ControlKind,
    ack: oneshot::Sender<()>,
}

struct Worker {
    cancel: CancellationToken,
    control: mpsc::Sender<ControlRequest>,
    handle: JoinHandle<()>,
}

// ── Supervisor ───────────────────────────────────────────────────

/// Keeps the capture binary running on the device.
pub struct Supervisor {
    device: Arc<dyn DeviceAgent>,
    artifacts: Arc<dyn ArtifactSource>,
    config: SupervisorConfig,
    lifecycle: Lifecycle,
    /// Bounding box for the next start.
    quality: Mutex<QualityTier>,
    worker: Mutex<Option<Worker>>,
}

impl Supervisor {
    pub fn new(
        device: Arc<dyn DeviceAgent>,
        artifacts: Arc<dyn ArtifactSource>,
        config: SupervisorConfig,
    ) -> Self {
        let quality = config.quality;
        Self {
            device,
            artifacts,
            config,
            lifecycle: Lifecycle::new(COMPONENT),
            quality: Mutex::new(quality),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Provision, probe, and spawn the supervision loop.
    ///
    /// Returns once the probe succeeded; the first frame may still be
    /// some way off.
    pub async fn start(&self) -> Result<Provisioned> {
        let _guard = self.lifecycle.try_begin()?;
        self.lifecycle.begin_start()?;
        match self.spawn().await {
            Ok(provisioned) => Ok(provisioned),
            Err(e) => {
                self.lifecycle.finish(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Signal the loop to kill the process and wait for it to exit.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.try_begin()?;
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if self.lifecycle.begin_stop() {
                worker.cancel.cancel();
            }
            if let Err(e) = worker.handle.await {
                self.lifecycle
                    .finish(Err(CaptureError::Other(format!("supervision task aborted: {e}"))));
            }
        }
        self.lifecycle.wait().await
    }

    /// Terminal outcome of the most recent run.
    pub async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }

    /// Change the bounding box. A running loop restarts the process once
    /// with the new geometry; this waits until the loop took the request.
    pub async fn set_quality(&self, quality: QualityTier) {
        *self.quality.lock().await = quality;
        let Some(control) = self.control().await else {
            return;
        };
        let (ack, acked) = oneshot::channel();
        let request = ControlRequest {
            kind: ControlKind::Quality(quality),
            ack,
        };
        if control.send(request).await.is_ok() {
            let _ = acked.await;
        }
    }

    /// Ask for a restart with rotation `rotation`. Best effort: the request
    /// is dropped unless the loop takes it within the rotation timeout.
    /// Returns whether it was taken.
    pub async fn set_rotation(&self, rotation: u32) -> bool {
        let Some(control) = self.control().await else {
            debug!(rotation, "rotation ignored: supervisor not running");
            return false;
        };
        let (ack, mut acked) = oneshot::channel();
        let request = ControlRequest {
            kind: ControlKind::Rotate(rotation),
            ack,
        };
        let submit = async { control.send(request).await.is_ok() && (&mut acked).await.is_ok() };
        let outcome = tokio::time::timeout(self.config.rotation_timeout(), submit).await;
        let taken = match outcome {
            Ok(taken) => taken,
            // Closing settles the race with the loop: either its ack is
            // already in, or its send fails and it skips the request.
            Err(_) => {
                acked.close();
                acked.try_recv().is_ok()
            }
        };
        if !taken {
            debug!(rotation, "rotation request dropped");
        }
        taken
    }

    async fn control(&self) -> Option<mpsc::Sender<ControlRequest>> {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|worker| worker.control.clone())
    }

    async fn spawn(&self) -> Result<Provisioned> {
        kill_capture(self.device.as_ref(), &self.config).await;
        let provisioned = self.prepare_with_retry().await?;
        let quality = *self.quality.lock().await;
        let geometry = SessionGeometry::new(&provisioned.info, quality);
        info!(
            binary = %provisioned.binary,
            variant = ?provisioned.variant,
            projection = %geometry.projection(),
            "capture binary ready"
        );

        let (control, requests) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let supervision = SupervisionLoop {
            device: Arc::clone(&self.device),
            config: self.config.clone(),
            binary: provisioned.binary.clone(),
            geometry,
            requests,
            cancel: cancel.clone(),
        };

        self.lifecycle.mark_running();
        let lifecycle = self.lifecycle.clone();
        let handle = tokio::spawn(async move {
            let outcome = supervision.run().await;
            lifecycle.finish(outcome);
        });
        *self.worker.lock().await = Some(Worker {
            cancel,
            control,
            handle,
        });
        Ok(provisioned)
    }

    /// The binary may report the device as busy right after a previous
    /// instance died; kill strays and try again.
    async fn prepare_with_retry(&self) -> Result<Provisioned> {
        let mut attempt = 0;
        loop {
            match self.prepare().await {
                Ok(provisioned) => return Ok(provisioned),
                Err(e) if attempt >= self.config.probe_retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "probe failed; retrying");
                    kill_capture(self.device.as_ref(), &self.config).await;
                    tokio::time::sleep(self.config.probe_backoff()).await;
                }
            }
        }
    }

    async fn prepare(&self) -> Result<Provisioned> {
        let slow = self.config.remote_path(&self.config.slow_binary);
        let (variant, binary) = if self.exists(&slow).await {
            (BinaryVariant::Slow, slow)
        } else {
            self.push_files().await?;
            let fast = self.config.remote_path(&self.config.fast_binary);
            (BinaryVariant::Fast, fast)
        };

        let env = self.config.library_env();
        let output = self.device.run_command(&[env.as_str(), binary.as_str(), "-i"]).await?;
        let info = CaptureInfo::parse(&output)?;
        Ok(Provisioned {
            variant,
            binary,
            info,
        })
    }

    async fn push_files(&self) -> Result<()> {
        let props = self.device.properties().await?;
        let abi = props
            .get(ABI_PROPERTY)
            .ok_or_else(|| CaptureError::Provisioning(format!("no {ABI_PROPERTY} property")))?;
        let sdk = props
            .get(SDK_PROPERTY)
            .ok_or_else(|| CaptureError::Provisioning(format!("no {SDK_PROPERTY} property")))?;

        let library = &self.config.fast_library;
        let binary = &self.config.fast_binary;
        let files = [
            (library, library_path(sdk, abi, library), 0o644),
            (binary, binary_path(abi, binary), 0o755),
        ];
        for (file, artifact, mode) in files {
            let dst = self.config.remote_path(file);
            if self.exists(&dst).await {
                debug!(%dst, "already on device");
                continue;
            }
            let data = self.artifacts.fetch(&artifact).await?;
            self.device
                .push(data, &dst, mode)
                .await
                .map_err(|e| CaptureError::Provisioning(format!("push {dst}: {e}")))?;
            info!(%dst, "pushed");
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        matches!(self.device.stat(path).await, Ok(Some(_)))
    }
}

/// Kill every instance of both variants. Failures only mean there was
/// nothing to kill.
async fn kill_capture(device: &dyn DeviceAgent, config: &SupervisorConfig) {
    for name in [&config.fast_binary, &config.slow_binary] {
        if let Err(e) = device.kill_by_name(name).await {
            debug!(name = %name, error = %e, "kill skipped");
        }
    }
}

// ── SupervisionLoop ──────────────────────────────────────────────

type Watch = Pin<Box<dyn Future<Output = CaptureError> + Send>>;

enum Event {
    Exited(CaptureError),
    Request(Option<ControlRequest>),
    Stop,
}

struct SupervisionLoop {
    device: Arc<dyn DeviceAgent>,
    config: SupervisorConfig,
    binary: String,
    geometry: SessionGeometry,
    requests: mpsc::Receiver<ControlRequest>,
    cancel: CancellationToken,
}

impl SupervisionLoop {
    async fn run(mut self) -> Result<()> {
        kill_capture(self.device.as_ref(), &self.config).await;
        let mut watch = self.launch();
        let mut restart = false;
        let mut requests_open = true;

        loop {
            // The watch goes first so a fresh launch reaches the device
            // before a request can kill it. Requests wait while a restart
            // is pending: one kill and relaunch per request.
            let event = tokio::select! {
                biased;
                err = &mut watch => Event::Exited(err),
                _ = self.cancel.cancelled() => Event::Stop,
                request = self.requests.recv(), if requests_open && !restart => Event::Request(request),
            };

            match event {
                Event::Exited(err) => {
                    if !restart {
                        return Err(err);
                    }
                    restart = false;
                    info!(projection = %self.geometry.projection(), "relaunching capture process");
                    watch = self.launch();
                }
                Event::Request(None) => requests_open = false,
                Event::Request(Some(request)) => {
                    if request.ack.send(()).is_err() {
                        debug!(kind = ?request.kind, "stale request skipped");
                        continue;
                    }
                    match request.kind {
                        ControlKind::Rotate(rotation) => self.geometry.rotation = rotation,
                        ControlKind::Quality(quality) => self.geometry.set_quality(quality),
                    }
                    info!(kind = ?request.kind, "restart requested");
                    restart = true;
                    kill_capture(self.device.as_ref(), &self.config).await;
                }
                Event::Stop => {
                    kill_capture(self.device.as_ref(), &self.config).await;
                    return Ok(());
                }
            }
        }
    }

    fn launch(&self) -> Watch {
        let args = vec![
            self.config.library_env(),
            self.binary.clone(),
            "-P".to_string(),
            self.geometry.projection(),
            "-S".to_string(),
        ];
        debug!(?args, "launching capture process");
        let device = Arc::clone(&self.device);
        let line_max = self.config.control_line_max;
        Box::pin(async move {
            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            match device.open_command(&argv).await {
                Ok(output) => watch_control_stream(output, line_max).await,
                Err(e) => e,
            }
        })
    }
}

/// Follow the process's standard output until it ends. Always returns the
/// reason the process is considered gone.
///
/// ```text
/// PID: 9355
/// INFO: Using projection 720x1280@720x1280/0
/// INFO: (jni/minicap/JpgEncoder.cpp:64) Allocating 2766852 bytes for JPG encoder
/// ```
async fn watch_control_stream<R>(output: R, line_max: usize) -> CaptureError
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(output, LinesCodec::new_with_max_length(line_max));

    let first = loop {
        match lines.next().await {
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => break line,
            Some(Err(e)) => return control_error(e),
            None => return CaptureError::SupervisionTerminated,
        }
    };
    if !first.contains("PID:") {
        return CaptureError::protocol(format!("expected `PID: <pid>`, got {first:?}"));
    }
    info!(line = first.trim(), "capture process started");

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => trace!(%line, "capture"),
            Err(e) => {
                debug!(error = %e, "control stream error");
                break;
            }
        }
    }
    CaptureError::SupervisionTerminated
}

fn control_error(e: LinesCodecError) -> CaptureError {
    match e {
        LinesCodecError::Io(e) => e.into(),
        LinesCodecError::MaxLineLengthExceeded => {
            CaptureError::protocol("control stream line too long")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_stream_with_pid_ends_in_termination() {
        let mock = tokio_test::io::Builder::new()
            .read(b"PID: 9355\n")
            .read(b"INFO: Using projection 720x1280@720x1280/0\n")
            .build();
        let err = watch_control_stream(mock, 4096).await;
        assert!(matches!(err, CaptureError::SupervisionTerminated));
    }

    #[tokio::test]
    async fn blank_lines_before_pid_are_skipped() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\r\n\nPID: 1\n")
            .build();
        let err = watch_control_stream(mock, 4096).await;
        assert!(matches!(err, CaptureError::SupervisionTerminated));
    }

    #[tokio::test]
    async fn missing_pid_is_a_protocol_violation() {
        let mock = tokio_test::io::Builder::new()
            .read(b"ERROR: unable to open display\n")
            .build();
        let err = watch_control_stream(mock, 4096).await;
        match err {
            CaptureError::ProtocolViolation(msg) => assert!(msg.contains("unable to open display")),
            other => panic!("expected protocol violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlong_first_line_is_rejected() {
        let mock = tokio_test::io::Builder::new()
            .read(&[b'x'; 64])
            .build();
        let err = watch_control_stream(mock, 16).await;
        assert!(matches!(err, CaptureError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn read_error_before_pid_is_transport() {
        let mock = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "gone"))
            .build();
        let err = watch_control_stream(mock, 4096).await;
        assert!(matches!(err, CaptureError::Transport(_)));
    }
}
