//! A capture session: one [`Supervisor`] feeding one [`FrameReader`].

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;

use crate::config::SessionConfig;
use crate::device::{ArtifactSource, DeviceAgent, ForwardTarget};
use crate::error::{CaptureError, Result};
use crate::protocol::{CaptureInfo, Frame, QualityTier};
use crate::reader::{FrameReader, ReaderStats};
use crate::supervisor::{BinaryVariant, Provisioned, Supervisor};

/// Supervisor and reader behind one lifecycle.
pub struct CaptureSession {
    supervisor: Supervisor,
    reader: FrameReader,
    provisioned: Mutex<Option<Provisioned>>,
}

impl CaptureSession {
    pub fn new(
        device: Arc<dyn DeviceAgent>,
        artifacts: Arc<dyn ArtifactSource>,
        config: SessionConfig,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(Arc::clone(&device), artifacts, config.supervisor),
            reader: FrameReader::new(device, config.reader),
            provisioned: Mutex::new(None),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn reader(&self) -> &FrameReader {
        &self.reader
    }

    /// Start the supervisor, then the reader on the transport matching the
    /// chosen binary. A reader failure leaves the supervisor running;
    /// [`stop`](Self::stop) cleans up both.
    pub async fn start(&self) -> Result<()> {
        let provisioned = self.supervisor.start().await?;
        let target = self.transport_for(provisioned.variant);
        info!(variant = ?provisioned.variant, %target, "starting frame reader");
        *self.provisioned.lock().await = Some(provisioned);
        self.reader.start(target).await
    }

    /// Stop both parts, whatever happened to either, and report every
    /// failure.
    pub async fn stop(&self) -> Result<()> {
        let supervisor = self.supervisor.stop().await;
        let reader = self.reader.stop().await;
        CaptureError::combine([supervisor, reader])
    }

    /// Resolve as soon as either part finishes, with that part's outcome.
    /// Use [`stop`](Self::stop) to confirm both are down.
    pub async fn wait(&self) -> Result<()> {
        tokio::select! {
            outcome = self.supervisor.wait() => outcome,
            outcome = self.reader.wait() => outcome,
        }
    }

    pub async fn take_frames(&self) -> Option<mpsc::Receiver<Frame>> {
        self.reader.take_frames().await
    }

    pub fn stats(&self) -> watch::Receiver<ReaderStats> {
        self.reader.stats()
    }

    /// Device description from the latest successful start.
    pub async fn capture_info(&self) -> Option<CaptureInfo> {
        self.provisioned
            .lock()
            .await
            .as_ref()
            .map(|p| p.info.clone())
    }

    pub async fn set_quality(&self, quality: QualityTier) {
        self.supervisor.set_quality(quality).await;
    }

    pub async fn set_rotation(&self, rotation: u32) -> bool {
        self.supervisor.set_rotation(rotation).await
    }

    fn transport_for(&self, variant: BinaryVariant) -> ForwardTarget {
        let config = self.reader.config();
        match variant {
            BinaryVariant::Fast => config.fast_target(),
            BinaryVariant::Slow => config.slow_target(),
        }
    }
}
