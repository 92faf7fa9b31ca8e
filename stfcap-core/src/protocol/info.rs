//! Device description reported by the capture binary and the launch
//! geometry derived from it.

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

// ── CaptureInfo ──────────────────────────────────────────────────

/// Output of `minicap -i`, read once at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub id: i32,
    pub width: u32,
    pub height: u32,
    pub xdpi: f32,
    pub ydpi: f32,
    pub size: f32,
    pub density: f32,
    pub fps: f32,
    pub secure: bool,
    pub rotation: u32,
}

impl CaptureInfo {
    /// Parse the JSON document printed by the probe.
    pub fn parse(output: &str) -> Result<Self, CaptureError> {
        Ok(serde_json::from_str(output.trim())?)
    }
}

// ── QualityTier ──────────────────────────────────────────────────

/// Maximum bounding square applied to captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum QualityTier {
    P1080,
    #[default]
    P720,
    P480,
    P240,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [Self::P1080, Self::P720, Self::P480, Self::P240];

    /// Side of the bounding square in pixels.
    pub const fn max_side(self) -> u32 {
        match self {
            Self::P1080 => 1080,
            Self::P720 => 720,
            Self::P480 => 480,
            Self::P240 => 240,
        }
    }
}

impl TryFrom<u32> for QualityTier {
    type Error = CaptureError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.max_side() == value)
            .ok_or_else(|| CaptureError::Other(format!("unsupported quality tier: {value}")))
    }
}

impl From<QualityTier> for u32 {
    fn from(tier: QualityTier) -> u32 {
        tier.max_side()
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}p", self.max_side())
    }
}

// ── SessionGeometry ──────────────────────────────────────────────

/// Parameters the capture binary is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionGeometry {
    pub device_width: u32,
    pub device_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub rotation: u32,
}

impl SessionGeometry {
    pub fn new(info: &CaptureInfo, quality: QualityTier) -> Self {
        Self {
            device_width: info.width,
            device_height: info.height,
            max_width: quality.max_side(),
            max_height: quality.max_side(),
            rotation: info.rotation,
        }
    }

    pub fn set_quality(&mut self, quality: QualityTier) {
        self.max_width = quality.max_side();
        self.max_height = quality.max_side();
    }

    /// Projection argument for `-P`: `WxH@MWxMH/R`.
    pub fn projection(&self) -> String {
        format!(
            "{}x{}@{}x{}/{}",
            self.device_width, self.device_height, self.max_width, self.max_height, self.rotation
        )
    }
}
