//! Tunables for the supervisor, the reader and the session that combines
//! them. Every struct deserializes with defaults for missing fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::ForwardTarget;
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, QualityTier};

/// Supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory holding the capture binaries on the device.
    pub remote_dir: String,
    /// Executable pushed on demand.
    pub fast_binary: String,
    /// Shared library the fast executable loads.
    pub fast_library: String,
    /// Preinstalled alternative executable; preferred when present.
    pub slow_binary: String,
    /// Bounding box used for the first launch.
    pub quality: QualityTier,
    /// Probe retries after the first attempt.
    pub probe_retries: u32,
    /// Pause between probe attempts in milliseconds.
    pub probe_backoff_ms: u64,
    /// How long a rotation request may wait for the loop, in milliseconds.
    pub rotation_timeout_ms: u64,
    /// Longest control-stream line accepted.
    pub control_line_max: usize,
}

/// Reader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Frames buffered for the consumer before new ones are dropped.
    pub queue_capacity: usize,
    /// Reconnection attempts for the reader's lifetime.
    pub max_retries: u32,
    /// Pause before each reconnection in milliseconds.
    pub retry_backoff_ms: u64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Abstract socket served by the fast binary.
    pub socket_name: String,
    /// Device TCP port served by the slow binary.
    pub slow_port: u16,
}

/// Settings for a whole capture session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub supervisor: SupervisorConfig,
    pub reader: ReaderConfig,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            remote_dir: "/data/local/tmp".into(),
            fast_binary: "minicap".into(),
            fast_library: "minicap.so".into(),
            slow_binary: "slow-minicap".into(),
            quality: QualityTier::P720,
            probe_retries: 3,
            probe_backoff_ms: 100,
            rotation_timeout_ms: 100,
            control_line_max: 4096,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 3,
            max_retries: 10,
            retry_backoff_ms: 500,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            socket_name: "minicap".into(),
            slow_port: 2016,
        }
    }
}

// ── Derived values ───────────────────────────────────────────────

impl SupervisorConfig {
    pub fn remote_path(&self, file: &str) -> String {
        format!("{}/{file}", self.remote_dir.trim_end_matches('/'))
    }

    pub fn probe_backoff(&self) -> Duration {
        Duration::from_millis(self.probe_backoff_ms)
    }

    pub fn rotation_timeout(&self) -> Duration {
        Duration::from_millis(self.rotation_timeout_ms)
    }

    /// `LD_LIBRARY_PATH=<remote_dir>` prefix for every launch.
    pub fn library_env(&self) -> String {
        format!("LD_LIBRARY_PATH={}", self.remote_dir.trim_end_matches('/'))
    }
}

impl ReaderConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn fast_target(&self) -> ForwardTarget {
        ForwardTarget::Abstract(self.socket_name.clone())
    }

    pub fn slow_target(&self) -> ForwardTarget {
        ForwardTarget::Tcp(self.slow_port)
    }
}
