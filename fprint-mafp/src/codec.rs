//! Frame codec for byte streams
//!
//! Transfers from the sensor do not have to line up with frames: one
//! transfer may carry several frames, or a frame may be split over several
//! transfers. [`FrameCodec`] buffers until a whole frame is available.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::constants::{CRC_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, SYNC_0, SYNC_1};
use crate::error::{Error, Result};
use crate::packet::Frame;

/// Decoder/encoder for [`Frame`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    /// Decode a frame from the byte stream.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Frame))` - A complete frame was decoded
    /// - `Ok(None)` - Need more data to complete the frame
    /// - `Err(Error)` - Bad sync, oversize length or CRC failure
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() >= 2 && (src[0], src[1]) != (SYNC_0, SYNC_1) {
            return Err(Error::BadSync(src[0], src[1]));
        }

        let Some(size) = Frame::peek_size(src) else {
            return Ok(None);
        };

        let payload_len = size - HEADER_SIZE - CRC_SIZE;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let raw = src.split_to(size);
        let frame = Frame::decode(&raw)?;
        trace!("Decoded {}: {}", frame, hex::encode(&raw));
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst)
    }
}
