//! Frame structure and encoding/decoding

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    command::Command,
    constants::{CRC_SIZE, DEFAULT_ADDRESS, HEADER_SIZE, MAX_PAYLOAD_SIZE, SYNC_0, SYNC_1},
    crc,
    error::{Error, Result},
};

/// Role of a frame in an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mark {
    /// Host command
    Command = 0x01,
    /// Data with more data frames following
    Data = 0x02,
    /// Answer to a command
    Answer = 0x07,
    /// Last data frame
    DataEnd = 0x08,
    /// Answer to a data phase
    DataAnswer = 0x09,
}

impl Mark {
    pub fn is_data(self) -> bool {
        matches!(self, Self::Data | Self::DataEnd)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Data => "data",
            Self::Answer => "answer",
            Self::DataEnd => "data-end",
            Self::DataAnswer => "data-answer",
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Mark> for u8 {
    fn from(mark: Mark) -> u8 {
        mark as u8
    }
}

impl TryFrom<u8> for Mark {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Command),
            0x02 => Ok(Self::Data),
            0x07 => Ok(Self::Answer),
            0x08 => Ok(Self::DataEnd),
            0x09 => Ok(Self::DataAnswer),
            _ => Err(Error::UnknownMark(value)),
        }
    }
}

/// One frame on the wire
///
/// # Frame Structure
///
/// ```text
/// ┌────────┬────────┬───────────┬────────┬───────────┬───────────┬───────────┐
/// │ Sync 0 │ Sync 1 │  Address  │  Mark  │  Length   │  Payload  │    CRC    │
/// │  0xEF  │  0x01  │  4 bytes  │ 1 byte │ (BE u16)  │  N bytes  │ (BE u16)  │
/// └────────┴────────┴───────────┴────────┴───────────┴───────────┴───────────┘
/// ```
///
/// The length counts payload bytes only; the CRC covers header and payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Module address
    pub address: u32,

    /// Frame role
    pub mark: Mark,

    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame for the default address
    pub fn new(mark: Mark, payload: impl Into<Bytes>) -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            mark,
            payload: payload.into(),
        }
    }

    /// Create a command frame: code followed by parameters
    pub fn command(command: Command, params: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(1 + params.len());
        payload.put_u8(command.into());
        payload.put_slice(params);
        Self::new(Mark::Command, payload.freeze())
    }

    /// Create an answer frame: result code followed by data
    pub fn answer(result: u8, data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(1 + data.len());
        payload.put_u8(result);
        payload.put_slice(data);
        Self::new(Mark::Answer, payload.freeze())
    }

    /// Address the frame to another module
    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        let address = self.address.to_be_bytes();
        let len = (self.payload.len() as u16).to_be_bytes();
        [
            SYNC_0,
            SYNC_1,
            address[0],
            address[1],
            address[2],
            address[3],
            self.mark.into(),
            len[0],
            len[1],
        ]
    }

    /// Calculate the CRC for this frame
    pub fn crc(&self) -> u16 {
        crc::calculate(&self.header(), &self.payload)
    }

    /// Get total frame size
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Append the encoded frame to `dst`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload does not fit one frame.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(self.size());
        dst.put_slice(&self.header());
        dst.put_slice(&self.payload);
        dst.put_u16(self.crc());
        Ok(())
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Total frame size announced by a header, if enough bytes are present
    pub fn peek_size(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let len = u16::from_be_bytes([buf[7], buf[8]]) as usize;
        Some(HEADER_SIZE + len + CRC_SIZE)
    }

    /// Decode exactly one frame
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The buffer is shorter than a header and CRC
    /// - The sync bytes or the mark are wrong
    /// - The buffer is shorter than the announced length
    /// - CRC verification fails
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE + CRC_SIZE {
            return Err(Error::FrameTooShort {
                expected: HEADER_SIZE + CRC_SIZE,
                actual: buf.len(),
            });
        }

        let mut cursor = buf;
        let sync = (cursor.get_u8(), cursor.get_u8());
        if sync != (SYNC_0, SYNC_1) {
            return Err(Error::BadSync(sync.0, sync.1));
        }

        let address = cursor.get_u32();
        let mark = Mark::try_from(cursor.get_u8())?;
        let len = cursor.get_u16() as usize;

        if len > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if cursor.len() < len + CRC_SIZE {
            return Err(Error::Truncated {
                what: "frame",
                needed: HEADER_SIZE + len + CRC_SIZE,
                actual: buf.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&cursor[..len]);
        cursor.advance(len);
        let received = cursor.get_u16();

        let expected = crc::calculate(&buf[..HEADER_SIZE], &payload);
        if expected != received {
            return Err(Error::CrcMismatch { expected, received });
        }

        Ok(Self {
            address,
            mark,
            payload,
        })
    }

    /// Command code of a command frame
    pub fn command_code(&self) -> Option<u8> {
        (self.mark == Mark::Command)
            .then(|| self.payload.first().copied())
            .flatten()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("address", &format!("0x{:08X}", self.address))
            .field("mark", &self.mark)
            .field("crc", &format!("0x{:04X}", self.crc()))
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}](len={})", self.mark, self.payload.len())
    }
}

/// Split a payload into data frames of at most `chunk` bytes
///
/// All frames but the last are [`Mark::Data`]; the last is
/// [`Mark::DataEnd`]. An empty payload becomes one empty `DataEnd` frame.
pub fn split_data(address: u32, payload: &[u8], chunk: usize) -> Vec<Frame> {
    let chunk = chunk.clamp(1, MAX_PAYLOAD_SIZE);

    if payload.is_empty() {
        return vec![Frame::new(Mark::DataEnd, Bytes::new()).with_address(address)];
    }

    let count = payload.len().div_ceil(chunk);
    payload
        .chunks(chunk)
        .enumerate()
        .map(|(i, part)| {
            let mark = if i + 1 == count {
                Mark::DataEnd
            } else {
                Mark::Data
            };
            Frame::new(mark, Bytes::copy_from_slice(part)).with_address(address)
        })
        .collect()
}

/// Collects a `Data… DataEnd` sequence
///
/// Nothing is handed out before the `DataEnd` frame arrived, so a failing
/// frame in the middle of a transfer never yields a partial payload.
#[derive(Debug, Default)]
pub struct DataAssembler {
    buf: BytesMut,
    frames: usize,
}

impl DataAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames collected so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Feed the next frame; returns the payload once `DataEnd` arrived
    pub fn push(&mut self, frame: Frame) -> Result<Option<Bytes>> {
        match frame.mark {
            Mark::Data => {
                self.buf.extend_from_slice(&frame.payload);
                self.frames += 1;
                Ok(None)
            }
            Mark::DataEnd => {
                self.buf.extend_from_slice(&frame.payload);
                self.frames += 1;
                Ok(Some(std::mem::take(&mut self.buf).freeze()))
            }
            other => Err(Error::UnexpectedMark {
                expected: "data",
                actual: other,
            }),
        }
    }
}

/// Reassemble a complete data transfer
pub fn reassemble(frames: impl IntoIterator<Item = Frame>) -> Result<Bytes> {
    let mut assembler = DataAssembler::new();
    for frame in frames {
        if let Some(payload) = assembler.push(frame)? {
            return Ok(payload);
        }
    }

    Err(Error::Truncated {
        what: "data transfer",
        needed: assembler.frames() + 1,
        actual: assembler.frames(),
    })
}
