//! Frame CRC
//!
//! CRC-16/XMODEM (poly 0x1021, init 0, no reflection) over the header and
//! payload, sent big-endian after the payload.

use crc::{Crc, CRC_16_XMODEM};
use tracing::trace;

const CRC_FRAME: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculate the CRC of a header and payload
pub fn calculate(header: &[u8], payload: &[u8]) -> u16 {
    let mut digest = CRC_FRAME.digest();
    digest.update(header);
    digest.update(payload);
    let crc = digest.finalize();

    trace!(
        header_len = header.len(),
        payload_len = payload.len(),
        crc = format!("0x{:04X}", crc),
        "Calculated CRC"
    );

    crc
}
