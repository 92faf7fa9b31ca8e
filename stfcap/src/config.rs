//! Configuration for the capture CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stfcap_core::{AdbDevice, HttpArtifacts, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Which device to talk to, and how.
    pub device: DeviceConfig,
    /// Where the capture binaries are downloaded from.
    pub artifacts: ArtifactConfig,
    /// Supervisor and reader tuning.
    pub session: SessionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// adb serial. Empty selects the only attached device.
    pub serial: String,
    /// adb executable.
    pub adb_path: String,
}

/// Artifact host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Base URL of the prebuilt minicap tree.
    pub base_url: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive, e.g. `"info"` or `"stfcap_core=debug"`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: String::new(),
            adb_path: "adb".into(),
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gohttp.nie.netease.com/openstf/vendor".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Default configuration as pretty TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// `adb` client for the configured device.
    pub fn adb_device(&self) -> AdbDevice {
        let serial = Some(self.device.serial.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        AdbDevice::new(serial).with_adb_path(&self.device.adb_path)
    }

    pub fn artifact_host(&self) -> HttpArtifacts {
        HttpArtifacts::new(self.artifacts.base_url.trim_end_matches('/'))
    }
}

// ── Tests ────────────────────────────────────────────────────────
