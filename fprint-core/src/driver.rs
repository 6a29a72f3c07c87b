//! Driver and capability traits
//!
//! A driver implements [`Driver`] for the mandatory lifecycle and exposes each
//! optional operation through an accessor returning a capability trait
//! object. A missing capability is `None`, and the session checks for it
//! before dispatching anything.

use std::sync::Arc;

use async_trait::async_trait;
use fprint_types::{Error, Features, Image, Print, Result, ScanType};

use crate::cancel::CancelHook;
use crate::context::ActionContext;
use crate::thermal::ThermalConfig;

/// Static description of a driver and the devices it handles
#[derive(Debug, Clone, PartialEq)]
pub struct DriverDescriptor {
    id: String,
    full_name: String,
    features: Features,
    scan_type: ScanType,
    nr_enroll_stages: u32,
    thermal: ThermalConfig,
}

impl DriverDescriptor {
    /// Descriptor without features, thermal management at its defaults
    pub fn new(id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            features: Features::empty(),
            scan_type: ScanType::default(),
            nr_enroll_stages: 0,
            thermal: ThermalConfig::default(),
        }
    }

    /// Set supported features
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Set the scan type
    pub fn with_scan_type(mut self, scan_type: ScanType) -> Self {
        self.scan_type = scan_type;
        self
    }

    /// Set the number of enroll scans
    pub fn with_enroll_stages(mut self, stages: u32) -> Self {
        self.nr_enroll_stages = stages;
        self
    }

    /// Set thermal time constants
    pub fn with_thermal(mut self, thermal: ThermalConfig) -> Self {
        self.thermal = thermal;
        self
    }

    /// Driver id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full driver name
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Supported features
    pub fn features(&self) -> Features {
        self.features
    }

    /// Scan type
    pub fn scan_type(&self) -> ScanType {
        self.scan_type
    }

    /// Number of enroll scans
    pub fn nr_enroll_stages(&self) -> u32 {
        self.nr_enroll_stages
    }

    /// Thermal time constants
    pub fn thermal(&self) -> ThermalConfig {
        self.thermal
    }
}

/// What probing found out about the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    pub device_id: Option<String>,
    pub name: Option<String>,
}

/// Mandatory driver lifecycle plus capability accessors
#[async_trait]
pub trait Driver: Send + 'static {
    fn descriptor(&self) -> &DriverDescriptor;

    async fn probe(&mut self, _ctx: &ActionContext) -> Result<ProbeInfo> {
        Ok(ProbeInfo::default())
    }

    async fn open(&mut self, ctx: &ActionContext) -> Result<()>;

    /// Drivers should try hard to close; the device counts as closed either way
    async fn close(&mut self, ctx: &ActionContext) -> Result<()>;

    fn enroller(&mut self) -> Option<&mut dyn Enroll> {
        None
    }

    fn verifier(&mut self) -> Option<&mut dyn Verify> {
        None
    }

    fn identifier(&mut self) -> Option<&mut dyn Identify> {
        None
    }

    fn capturer(&mut self) -> Option<&mut dyn Capture> {
        None
    }

    fn storage(&mut self) -> Option<&mut dyn Storage> {
        None
    }

    /// Opt into cancellation; without a hook actions run to completion
    fn cancel_hook(&self) -> Option<Arc<dyn CancelHook>> {
        None
    }

    /// Whether long-running actions can be parked on suspend
    fn supports_suspend(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait Enroll: Send {
    /// Enroll into `template`, reporting stages through the context
    async fn enroll(&mut self, ctx: &ActionContext, template: Print) -> Result<Print>;
}

#[async_trait]
pub trait Verify: Send {
    /// Report the outcome with [`ActionContext::report_match`]
    async fn verify(&mut self, ctx: &ActionContext, print: &Print) -> Result<()>;
}

#[async_trait]
pub trait Identify: Send {
    /// Report the matching gallery entry with [`ActionContext::report_match`]
    async fn identify(&mut self, ctx: &ActionContext, gallery: &[Print]) -> Result<()>;
}

#[async_trait]
pub trait Capture: Send {
    async fn capture(&mut self, ctx: &ActionContext, wait_for_finger: bool) -> Result<Image>;
}

#[async_trait]
pub trait Storage: Send {
    async fn list(&mut self, ctx: &ActionContext) -> Result<Vec<Print>>;

    async fn delete(&mut self, ctx: &ActionContext, print: &Print) -> Result<()>;

    async fn clear(&mut self, _ctx: &ActionContext) -> Result<()> {
        Err(Error::not_supported("Device storage cannot be cleared"))
    }

    /// Whether [`Storage::clear`] is implemented
    fn can_clear(&self) -> bool {
        false
    }
}

/// Which capabilities a driver exposes, probed once per device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub enroll: bool,
    pub verify: bool,
    pub identify: bool,
    pub capture: bool,
    pub storage: bool,
    pub clear: bool,
}

impl Capabilities {
    pub fn probe(driver: &mut dyn Driver) -> Self {
        Self {
            enroll: driver.enroller().is_some(),
            verify: driver.verifier().is_some(),
            identify: driver.identifier().is_some(),
            capture: driver.capturer().is_some(),
            storage: driver.storage().is_some(),
            clear: driver.storage().is_some_and(|storage| storage.can_clear()),
        }
    }
}
