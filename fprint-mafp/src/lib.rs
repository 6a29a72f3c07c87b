//! # fprint-mafp
//!
//! Driver for MAFP match-on-chip fingerprint modules.
//!
//! The module stores templates and matches on its own; the host talks to it
//! with small framed commands:
//!
//! - [`packet`] and [`codec`]: frame layout, CRC and stream decoding
//! - [`link`]: command/answer and data exchanges over a transport
//! - [`steps`]: the step machines behind every driver operation
//! - [`MafpDriver`]: the [`fprint_core::Driver`] implementation
//! - [`emulator`]: a software module for tests and demos
//!
//! ## Example
//!
//! ```no_run
//! use fprint_mafp::{emulator::SensorEmulator, MafpConfig, MafpDriver};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, sensor) = SensorEmulator::new().spawn();
//! sensor.touch_times(1, 12);
//! let driver = MafpDriver::new(Box::new(transport), MafpConfig::from_env());
//! # let _ = driver;
//! # }
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod constants;
pub mod crc;
pub mod driver;
pub mod emulator;
pub mod error;
pub mod link;
pub mod packet;
pub mod response;
pub mod steps;
pub mod template;

pub use codec::FrameCodec;
pub use command::Command;
pub use config::{DuplicateArea, DuplicateCheck, MafpConfig, PowerButtonShield};
pub use driver::MafpDriver;
pub use error::{Error, Result};
pub use link::Link;
pub use packet::{Frame, Mark};
pub use response::{Answer, SearchHit, SensorInfo, TemplateTable};
pub use template::{TemplateRecord, Uid};
