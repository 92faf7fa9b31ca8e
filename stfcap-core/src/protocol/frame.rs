use bytes::Bytes;

use crate::error::{CaptureError, Result};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// One captured JPEG image, as delivered by the remote binary.
///
/// Construction validates the start-of-image marker; the content is
/// otherwise opaque. Frames are moved to their consumer, never copied.
#[derive(PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(data: Bytes) -> Result<Self> {
        if !data.starts_with(&JPEG_SOI) {
            let head: Vec<u8> = data.iter().take(2).copied().collect();
            return Err(CaptureError::protocol(format!(
                "jpeg payload does not start with 0xff 0xd8: {head:02x?}"
            )));
        }
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.0.len()).finish()
    }
}
