//! # stfcap-core
//!
//! Live screen capture from an Android device through the `minicap` helper.
//!
//! This crate contains:
//! - **Device**: `DeviceAgent` / `ArtifactSource` capabilities with `adb` and HTTP backends
//! - **Protocol**: banner, JPEG frame and `MinicapCodec` for the data socket
//! - **Supervisor**: provisions and keeps the capture process alive, restarts on rotation/quality change
//! - **Reader**: forwards the data socket and republishes frames on a lossy bounded queue
//! - **Session**: both of the above behind one start/stop/wait lifecycle
//! - **Error**: `CaptureError`, a `thiserror`-based error hierarchy

pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod supervisor;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{ReaderConfig, SessionConfig, SupervisorConfig};
pub use device::{
    AdbDevice, ArtifactSource, CommandOutput, DeviceAgent, FileStat, ForwardTarget, HttpArtifacts,
};
pub use error::{CaptureError, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use protocol::{Banner, CaptureInfo, Frame, MinicapCodec, QualityTier, SessionGeometry, StreamItem};
pub use reader::{FrameReader, ReaderStats};
pub use session::CaptureSession;
pub use supervisor::{BinaryVariant, Provisioned, Supervisor};
