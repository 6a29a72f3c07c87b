//! Type definitions shared by the fprint crates

pub mod error;
pub mod features;
pub mod image;
pub mod print;

pub use error::{Error, Result, RetryKind};
pub use features::{Features, Finger, FingerStatus, ScanType, Temperature};
pub use image::Image;
pub use print::{Print, PrintKind};
