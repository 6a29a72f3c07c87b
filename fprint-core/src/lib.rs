//! # fprint-core
//!
//! Driver-facing framework for fingerprint sensor drivers.
//!
//! This crate provides what every driver builds on:
//! - The [`Driver`] trait and its optional capability traits
//! - The per-action [`ActionContext`] with critical sections and reporting
//! - The cancellation bridge between caller tokens and drivers
//! - The sensor thermal model
//! - The sequential state machine engine for protocol exchanges

pub mod action;
pub mod cancel;
pub mod context;
pub mod driver;
pub mod ssm;
pub mod thermal;

pub use action::Action;
pub use cancel::{CancelBridge, CancelHook, CriticalSection, FingerStatusSender};
pub use context::{ActionContext, EnrollProgressFn, MatchFn, MatchReport};
pub use driver::{
    Capabilities, Capture, Driver, DriverDescriptor, Enroll, Identify, ProbeInfo, Storage, Verify,
};
pub use fprint_types::{Error, Result};
pub use ssm::{Ssm, StepHandler, StepList, Transition};
pub use thermal::{ThermalConfig, ThermalModel};
