use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CaptureError;
use crate::protocol::banner::Banner;
use crate::protocol::frame::Frame;

/// Size of the per-frame length prefix.
const LENGTH_SIZE: usize = 4;

/// Default upper bound for a single frame payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One decoded unit of the capture stream.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamItem {
    Banner(Banner),
    Frame(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Banner,
    Frames,
}

/// Codec for the capture data socket: one [`Banner`] followed by
/// `u32` little-endian length-prefixed JPEG payloads.
///
/// A codec instance belongs to a single connection.
#[derive(Debug)]
pub struct MinicapCodec {
    state: DecodeState,
    max_frame_size: usize,
}

impl MinicapCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::Banner,
            max_frame_size,
        }
    }
}

impl Default for MinicapCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for MinicapCodec {
    type Item = StreamItem;
    type Error = CaptureError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.state {
            DecodeState::Banner => {
                if src.len() < Banner::SIZE {
                    return Ok(None);
                }
                let raw = src.split_to(Banner::SIZE);
                let banner = Banner::decode(&raw)?;
                self.state = DecodeState::Frames;
                Ok(Some(StreamItem::Banner(banner)))
            }
            DecodeState::Frames => {
                if src.len() < LENGTH_SIZE {
                    return Ok(None);
                }
                let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
                if len > self.max_frame_size {
                    return Err(CaptureError::protocol(format!(
                        "frame length {len} exceeds maximum {}",
                        self.max_frame_size
                    )));
                }
                if src.len() < LENGTH_SIZE + len {
                    src.reserve(LENGTH_SIZE + len - src.len());
                    return Ok(None);
                }
                src.advance(LENGTH_SIZE);
                let payload = src.split_to(len).freeze();
                Ok(Some(StreamItem::Frame(Frame::new(payload)?)))
            }
        }
    }
}

impl Encoder<StreamItem> for MinicapCodec {
    type Error = CaptureError;

    fn encode(&mut self, item: StreamItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StreamItem::Banner(banner) => dst.extend_from_slice(&banner.encode()),
            StreamItem::Frame(frame) => {
                let len = u32::try_from(frame.len())
                    .map_err(|_| CaptureError::protocol("frame does not fit a u32 length"))?;
                dst.reserve(LENGTH_SIZE + frame.len());
                dst.put_u32_le(len);
                dst.extend_from_slice(frame.as_bytes());
            }
        }
        Ok(())
    }
}
