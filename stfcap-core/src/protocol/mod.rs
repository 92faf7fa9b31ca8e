//! Wire formats spoken by the remote capture binary.
//!
//! - [`banner`]: 24-byte preamble of the data socket
//! - [`frame`]: validated JPEG payloads
//! - [`codec`]: `tokio_util` codec for the data socket
//! - [`info`]: `-i` probe output and launch geometry

pub mod banner;
pub mod codec;
pub mod frame;
pub mod info;

pub use banner::{Banner, Quirks};
pub use codec::{DEFAULT_MAX_FRAME_SIZE, MinicapCodec, StreamItem};
pub use frame::{Frame, JPEG_SOI};
pub use info::{CaptureInfo, QualityTier, SessionGeometry};
