//! Raw sensor images returned by capture

use std::fmt;

use bytes::Bytes;

/// A greyscale fingerprint image, one byte per pixel, row major
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Resolution in pixels per millimetre
    pub ppmm: f64,

    /// Pixel data
    pub data: Bytes,
}

impl Image {
    /// Create an image, returning `None` if the buffer does not match the size
    pub fn new(width: u32, height: u32, ppmm: f64, data: impl Into<Bytes>) -> Option<Self> {
        let data = data.into();
        let expected = usize::try_from(u64::from(width) * u64::from(height)).ok()?;
        if data.len() != expected {
            return None;
        }

        Some(Self {
            width,
            height,
            ppmm,
            data,
        })
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image[{}x{} @ {:.1} ppmm]", self.width, self.height, self.ppmm)
    }
}
