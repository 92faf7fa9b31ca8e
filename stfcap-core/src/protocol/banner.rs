//! Per-connection preamble sent by the capture binary.
//!
//! ## Wire format
//!
//! ```text
//! version:         u8   (1)
//! reserved:        u8   (1)
//! pid:             u32  (4)
//! real_width:      u32  (4)
//! real_height:     u32  (4)
//! virtual_width:   u32  (4)
//! virtual_height:  u32  (4)
//! orientation:     u8   (1)
//! quirks:          u8   (1)
//! ```
//!
//! All multi-byte fields are little-endian.

use bitflags::bitflags;

use crate::error::{CaptureError, Result};

bitflags! {
    /// Behavioural quirks advertised by the capture binary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Quirks: u8 {
        /// Frames are only produced when the screen changes.
        const DUMB           = 0b0000_0001;
        /// Frames are always upright regardless of rotation.
        const ALWAYS_UPRIGHT = 0b0000_0010;
        /// Frames may tear.
        const TEAR           = 0b0000_0100;
    }
}

/// Stream preamble, read exactly once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Banner {
    pub version: u8,
    pub reserved: u8,
    pub pid: u32,
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub orientation: u8,
    pub quirks: Quirks,
}

impl Banner {
    /// Encoded size on the wire.
    pub const SIZE: usize = 24;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.reserved;
        buf[2..6].copy_from_slice(&self.pid.to_le_bytes());
        buf[6..10].copy_from_slice(&self.real_width.to_le_bytes());
        buf[10..14].copy_from_slice(&self.real_height.to_le_bytes());
        buf[14..18].copy_from_slice(&self.virtual_width.to_le_bytes());
        buf[18..22].copy_from_slice(&self.virtual_height.to_le_bytes());
        buf[22] = self.orientation;
        buf[23] = self.quirks.bits();
        buf
    }

    /// Deserialize from bytes. Unknown quirk bits are kept.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(CaptureError::protocol(format!(
                "banner too short: {} < {}",
                data.len(),
                Self::SIZE,
            )));
        }
        Ok(Self {
            version: data[0],
            reserved: data[1],
            pid: le_u32(&data[2..6]),
            real_width: le_u32(&data[6..10]),
            real_height: le_u32(&data[10..14]),
            virtual_width: le_u32(&data[14..18]),
            virtual_height: le_u32(&data[18..22]),
            orientation: data[22],
            quirks: Quirks::from_bits_retain(data[23]),
        })
    }
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
