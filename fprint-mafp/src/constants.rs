//! Protocol constants

use std::time::Duration;

/// Driver id stamped on every print
pub const DRIVER_ID: &str = "mafp";

/// Human readable driver name
pub const DRIVER_NAME: &str = "MAFP match-on-chip fingerprint module";

/// First sync byte of every frame
pub const SYNC_0: u8 = 0xEF;

/// Second sync byte of every frame
pub const SYNC_1: u8 = 0x01;

/// Module address used when none is configured
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Largest transfer the sensor handles
pub const BUFFER_SIZE: usize = 512;

/// Sync bytes, address, mark and length
pub const HEADER_SIZE: usize = 9;

/// Trailing CRC
pub const CRC_SIZE: usize = 2;

/// Largest payload one frame can carry
pub const MAX_PAYLOAD_SIZE: usize = BUFFER_SIZE - HEADER_SIZE - CRC_SIZE;

/// Timeout for a command answer
pub const CMD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Timeout for one data frame
pub const DATA_TIMEOUT: Duration = Duration::from_millis(5000);

/// Timeout for short control exchanges
pub const CTRL_TIMEOUT: Duration = Duration::from_millis(200);

/// Interval between two finger polls
pub const FINGER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handshake payload the module echoes back
pub const HANDSHAKE_CODE: [u8; 2] = [b'M', b'A'];

/// Number of enroll samples when not overridden
pub const DEFAULT_ENROLL_SAMPLES: u32 = 12;

/// Upper bound for enroll samples; each sample needs its own feature buffer
pub const MAX_ENROLL_SAMPLES: u32 = u8::MAX as u32;

/// Environment variable overriding the enroll sample count
pub const ENV_ENROLL_SAMPLES: &str = "MAFP_ENROLL_SAMPLES";

/// Consecutive image errors tolerated before giving up
pub const IMAGE_ERROR_THRESHOLD: u32 = 30;

/// Number of template slots the occupancy bitmap describes
pub const TEMPLATE_TABLE_SLOTS: usize = 256 * 8;

/// Size of the occupancy bitmap
pub const TEMPLATE_TABLE_BITMAP: usize = 256;

/// Template record field sizes
pub mod record {
    /// Device serial number
    pub const SERIAL_SIZE: usize = 32;

    /// Template id
    pub const ID_SIZE: usize = 2;

    /// Template uid
    pub const UID_SIZE: usize = 128;

    /// Whole record
    pub const RECORD_SIZE: usize = SERIAL_SIZE + ID_SIZE + UID_SIZE;
}

/// Answer result codes
pub mod result {
    pub const SUCCESS: u8 = 0x00;

    /// Unspecified failure
    pub const FAIL: u8 = 0x01;

    /// GET_IMAGE: nothing on the sensor
    pub const NO_FINGER: u8 = 0x02;

    /// GET_IMAGE: image or calibration error
    pub const IMAGE_ERROR: u8 = 0x03;

    /// GEN_FEATURE: image too messy
    pub const FEATURE_MESSY: u8 = 0x06;

    /// GEN_FEATURE: too few feature points
    pub const FEATURE_FEW: u8 = 0x07;

    /// Match or search failed
    pub const NO_MATCH: u8 = 0x08;

    /// No template found for the search
    pub const NOT_FOUND: u8 = 0x09;

    /// More templates than the table can hold
    pub const TPL_NUM_OVERSIZE: u8 = 0x0B;
}
