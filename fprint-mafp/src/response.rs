//! Answer parsing

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::command::Command;
use crate::constants::{result, HANDSHAKE_CODE, TEMPLATE_TABLE_BITMAP};
use crate::error::{Error, Result};
use crate::packet::{Frame, Mark};
use crate::template::c_string;

/// Answer to one command: result code and data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub command: Command,
    pub result: u8,
    pub data: Bytes,
}

impl Answer {
    /// Interpret an answer frame for `command`
    pub fn from_frame(command: Command, frame: Frame) -> Result<Self> {
        if !matches!(frame.mark, Mark::Answer | Mark::DataAnswer) {
            return Err(Error::UnexpectedMark {
                expected: "answer",
                actual: frame.mark,
            });
        }

        let Some((&code, data)) = frame.payload.split_first() else {
            return Err(Error::Truncated {
                what: "answer",
                needed: 1,
                actual: 0,
            });
        };

        Ok(Self {
            command,
            result: code,
            data: frame.payload.slice_ref(data),
        })
    }

    pub fn is_success(&self) -> bool {
        self.result == result::SUCCESS
    }

    /// Turn a failure code into an error
    pub fn check(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.failure())
        }
    }

    /// The result code as an error, whatever its value
    pub fn failure(&self) -> Error {
        Error::Device {
            command: self.command,
            code: self.result,
        }
    }

    fn need(&self, what: &'static str, len: usize) -> Result<&[u8]> {
        if self.data.len() < len {
            return Err(Error::Truncated {
                what,
                needed: len,
                actual: self.data.len(),
            });
        }
        Ok(&self.data[..len])
    }

    /// Big-endian u16 at the start of the data (max id, template count)
    pub fn u16_value(&self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.need("u16 answer", 2)?))
    }

    pub fn search_hit(&self) -> Result<SearchHit> {
        let raw = self.need("search answer", 4)?;
        Ok(SearchHit {
            id: BigEndian::read_u16(&raw[..2]),
            score: BigEndian::read_u16(&raw[2..4]),
        })
    }

    /// Handshake echo, with the boot record when the module sends one
    pub fn sensor_info(&self) -> Result<SensorInfo> {
        let code = self.need("handshake answer", 2)?;
        if code != HANDSHAKE_CODE {
            return Err(Error::Handshake(code.to_vec()));
        }

        if self.data.len() < SensorInfo::BOOT_RECORD_SIZE {
            return Ok(SensorInfo::default());
        }

        Ok(SensorInfo {
            state: Some(self.data[2]),
            description: Some(c_string(&self.data[3..19])),
            version: Some(BigEndian::read_u32(&self.data[19..23])),
        })
    }
}

/// Result of a search or match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub id: u16,
    pub score: u16,
}

/// Boot record carried by the handshake answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorInfo {
    pub state: Option<u8>,
    pub description: Option<String>,
    pub version: Option<u32>,
}

impl SensorInfo {
    /// Code, state, description and version
    pub const BOOT_RECORD_SIZE: usize = 2 + 1 + 16 + 4;
}

impl fmt::Display for SensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.description, self.version) {
            (Some(desc), Some(version)) => write!(f, "{desc} (version 0x{version:08X})"),
            _ => f.write_str("MAFP module"),
        }
    }
}

/// Slot occupancy of the module
#[derive(Clone, PartialEq, Eq)]
pub struct TemplateTable {
    used: u8,
    bitmap: [u8; TEMPLATE_TABLE_BITMAP],
}

impl TemplateTable {
    pub const SIZE: usize = 1 + TEMPLATE_TABLE_BITMAP;

    pub fn new() -> Self {
        Self {
            used: 0,
            bitmap: [0; TEMPLATE_TABLE_BITMAP],
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            return Err(Error::Truncated {
                what: "template table",
                needed: Self::SIZE,
                actual: raw.len(),
            });
        }

        let mut bitmap = [0u8; TEMPLATE_TABLE_BITMAP];
        bitmap.copy_from_slice(&raw[1..Self::SIZE]);
        Ok(Self {
            used: raw[0],
            bitmap,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.used);
        out.extend_from_slice(&self.bitmap);
        out
    }

    /// Count reported by the module
    pub fn used(&self) -> u8 {
        self.used
    }

    pub fn is_used(&self, id: u16) -> bool {
        let (byte, bit) = (usize::from(id / 8), id % 8);
        self.bitmap.get(byte).is_some_and(|b| b & (1 << bit) != 0)
    }

    pub fn set(&mut self, id: u16, used: bool) {
        let (byte, bit) = (usize::from(id / 8), id % 8);
        let Some(slot) = self.bitmap.get_mut(byte) else {
            return;
        };

        let was = *slot & (1 << bit) != 0;
        if used {
            *slot |= 1 << bit;
        } else {
            *slot &= !(1 << bit);
        }

        match (was, used) {
            (false, true) => self.used = self.used.saturating_add(1),
            (true, false) => self.used = self.used.saturating_sub(1),
            _ => {}
        }
    }

    /// Occupied slot ids in ascending order
    pub fn ids(&self) -> Vec<u16> {
        (0..(TEMPLATE_TABLE_BITMAP * 8) as u16)
            .filter(|id| self.is_used(*id))
            .collect()
    }

    /// Lowest free slot below `max_id`
    pub fn first_free(&self, max_id: u16) -> Option<u16> {
        (0..max_id).find(|id| !self.is_used(*id))
    }
}

impl Default for TemplateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateTable")
            .field("used", &self.used)
            .field("ids", &self.ids())
            .finish()
    }
}
