//! # fprint
//!
//! Device sessions for fingerprint sensors.
//!
//! A [`Device`] wraps one driver and serializes everything done with it:
//! open and close, enrolling, verifying and identifying prints, raw image
//! capture, on-device storage, suspend and resume. Every action returns a
//! [`Task`] that resolves exactly once; each also has a `*_sync` variant.
//!
//! Drivers are written against [`fprint_core`]. The MAFP match-on-chip
//! driver ships with the crate as [`mafp`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use fprint::{CancellationToken, Device, Print};
//! use fprint::mafp::emulator::{SensorEmulator, Touch};
//! use fprint::mafp::{MafpConfig, MafpDriver};
//!
//! #[tokio::main]
//! async fn main() -> fprint::Result<()> {
//!     let (transport, sensor) = SensorEmulator::new().spawn();
//!     let device = Device::new(Box::new(MafpDriver::new(
//!         Box::new(transport),
//!         MafpConfig::from_env(),
//!     )));
//!     let cancel = CancellationToken::new();
//!
//!     device.probe(&cancel).await?;
//!     device.open(&cancel).await?;
//!
//!     sensor.touch_times(1, device.nr_enroll_stages() as usize);
//!     let enrolled = device.enroll(Print::new(), &cancel, None).await?;
//!
//!     sensor.touch(Touch::finger(1));
//!     let result = device.verify(&enrolled, &cancel, None).await?;
//!     println!("match: {}", result.is_match());
//!
//!     device.close(&cancel).await
//! }
//! ```

pub mod blocking;
pub mod device;
mod job;
pub mod task;

pub use device::{Device, DEFAULT_DEVICE_ID};
pub use job::MatchResult;
pub use task::Task;

pub use fprint_core::{
    Action, Driver, DriverDescriptor, EnrollProgressFn, MatchFn, ProbeInfo, ThermalConfig,
};
pub use fprint_types::{
    Error, Features, Finger, FingerStatus, Image, Print, PrintKind, Result, RetryKind, ScanType,
    Temperature,
};
pub use tokio_util::sync::CancellationToken;

pub use fprint_mafp as mafp;
pub use fprint_transport as transport;
