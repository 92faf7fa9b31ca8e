//! Capabilities the capture session needs from the outside world.
//!
//! The session never talks to a device or a download host directly; it goes
//! through [`DeviceAgent`] and [`ArtifactSource`]. [`AdbDevice`] and
//! [`HttpArtifacts`] are the production implementations.

pub mod adb;
pub mod artifacts;
pub mod ps;

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::error::Result;

pub use adb::AdbDevice;
pub use artifacts::HttpArtifacts;

/// Streaming standard output of a long-running remote command. Dropping it
/// releases the local end of the command.
pub type CommandOutput = Box<dyn AsyncRead + Send + Unpin>;

// ── ForwardTarget ────────────────────────────────────────────────

/// Remote endpoint a local TCP port can be forwarded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ForwardTarget {
    /// Abstract-namespace unix socket.
    Abstract(String),
    /// TCP port on the device loopback.
    Tcp(u16),
}

impl std::fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "localabstract:{name}"),
            Self::Tcp(port) => write!(f, "tcp:{port}"),
        }
    }
}

/// Result of a remote `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
}

// ── DeviceAgent ──────────────────────────────────────────────────

/// Everything the session does on the device.
#[async_trait]
pub trait DeviceAgent: Send + Sync {
    /// Run a shell command and capture its standard output.
    async fn run_command(&self, args: &[&str]) -> Result<String>;

    /// Start a shell command and stream its standard output.
    async fn open_command(&self, args: &[&str]) -> Result<CommandOutput>;

    /// `Ok(None)` when the path does not exist.
    async fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// Write `data` to `path` and apply `mode`.
    async fn push(&self, data: Bytes, path: &str, mode: u32) -> Result<()>;

    /// System properties (`getprop`).
    async fn properties(&self) -> Result<HashMap<String, String>>;

    /// Forward a free local TCP port to `target` and return its address.
    async fn forward(&self, target: &ForwardTarget) -> Result<SocketAddr>;

    /// Force-kill every process whose listing line mentions `name`.
    /// Returns the number of processes signalled.
    async fn kill_by_name(&self, name: &str) -> Result<usize> {
        let listing = self.run_command(&["ps", "-C", name]).await?;
        let pids = ps::matching_pids(&listing, name);
        for pid in &pids {
            let pid = pid.to_string();
            if let Err(e) = self.run_command(&["kill", "-9", pid.as_str()]).await {
                warn!(%pid, error = %e, "kill failed");
            }
        }
        debug!(name, killed = pids.len(), "kill by name");
        Ok(pids.len())
    }
}

// ── ArtifactSource ───────────────────────────────────────────────

/// Host serving capture binaries by relative path.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_target_display() {
        assert_eq!(
            ForwardTarget::Abstract("minicap".into()).to_string(),
            "localabstract:minicap"
        );
        assert_eq!(ForwardTarget::Tcp(2016).to_string(), "tcp:2016");
    }
}
