//! Driver configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::constants::{
    CMD_TIMEOUT, CTRL_TIMEOUT, DATA_TIMEOUT, DEFAULT_ADDRESS, DEFAULT_ENROLL_SAMPLES,
    ENV_ENROLL_SAMPLES, FINGER_POLL_INTERVAL, IMAGE_ERROR_THRESHOLD, MAX_ENROLL_SAMPLES,
    MAX_PAYLOAD_SIZE,
};

/// When enrolling searches for the finger among stored templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateCheck {
    /// Never
    Disabled,
    /// After every sample
    Enabled,
    /// After the first sample only
    #[default]
    Once,
}

/// Whether two samples may cover the same finger area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateArea {
    /// Reject and ask the user to move the finger
    #[default]
    Deny,
    Allow,
}

/// Keeps the host's power button from reacting while the finger rests on a
/// sensor built into it
pub trait PowerButtonShield: Send + Sync {
    fn raise(&self);
    fn lower(&self);
}

/// Driver settings
#[derive(Clone)]
pub struct MafpConfig {
    pub enroll_samples: u32,
    pub duplicate_check: DuplicateCheck,
    pub duplicate_delete: bool,
    pub duplicate_area: DuplicateArea,
    pub poll_interval: Duration,
    pub cmd_timeout: Duration,
    pub data_timeout: Duration,
    pub ctrl_timeout: Duration,
    pub image_error_threshold: u32,
    pub address: u32,
    pub data_chunk: usize,
    pub shield: Option<Arc<dyn PowerButtonShield>>,
    /// Log state machine transitions at debug level
    pub debug_ssm: bool,
}

impl MafpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults plus overrides from the environment
    pub fn from_env() -> Self {
        let value = std::env::var(ENV_ENROLL_SAMPLES).ok();
        Self::default().with_samples_override(value.as_deref())
    }

    /// Apply a textual enroll sample override; bad values are ignored
    pub fn with_samples_override(mut self, value: Option<&str>) -> Self {
        let Some(value) = value else {
            return self;
        };

        match value.trim().parse::<u32>() {
            Ok(samples) if (1..=MAX_ENROLL_SAMPLES).contains(&samples) => {
                self.enroll_samples = samples
            }
            _ => warn!("Ignoring invalid {}={:?}", ENV_ENROLL_SAMPLES, value),
        }
        self
    }

    /// Samples per enrollment, capped at [`MAX_ENROLL_SAMPLES`]
    pub fn with_enroll_samples(mut self, samples: u32) -> Self {
        self.enroll_samples = samples.clamp(1, MAX_ENROLL_SAMPLES);
        self
    }

    /// Samples an enrollment actually takes
    pub fn enroll_stages(&self) -> u32 {
        self.enroll_samples.clamp(1, MAX_ENROLL_SAMPLES)
    }

    pub fn with_duplicate_check(mut self, check: DuplicateCheck) -> Self {
        self.duplicate_check = check;
        self
    }

    pub fn with_duplicate_delete(mut self, delete: bool) -> Self {
        self.duplicate_delete = delete;
        self
    }

    pub fn with_duplicate_area(mut self, area: DuplicateArea) -> Self {
        self.duplicate_area = area;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cmd_timeout(mut self, timeout: Duration) -> Self {
        self.cmd_timeout = timeout;
        self
    }

    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    pub fn with_image_error_threshold(mut self, threshold: u32) -> Self {
        self.image_error_threshold = threshold;
        self
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    /// Largest payload per outgoing data frame
    pub fn with_data_chunk(mut self, chunk: usize) -> Self {
        self.data_chunk = chunk.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_shield(mut self, shield: Arc<dyn PowerButtonShield>) -> Self {
        self.shield = Some(shield);
        self
    }

    pub fn with_debug_ssm(mut self, debug: bool) -> Self {
        self.debug_ssm = debug;
        self
    }
}

impl Default for MafpConfig {
    fn default() -> Self {
        Self {
            enroll_samples: DEFAULT_ENROLL_SAMPLES,
            duplicate_check: DuplicateCheck::default(),
            duplicate_delete: false,
            duplicate_area: DuplicateArea::default(),
            poll_interval: FINGER_POLL_INTERVAL,
            cmd_timeout: CMD_TIMEOUT,
            data_timeout: DATA_TIMEOUT,
            ctrl_timeout: CTRL_TIMEOUT,
            image_error_threshold: IMAGE_ERROR_THRESHOLD,
            address: DEFAULT_ADDRESS,
            data_chunk: MAX_PAYLOAD_SIZE,
            shield: None,
            debug_ssm: false,
        }
    }
}

impl fmt::Debug for MafpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MafpConfig")
            .field("enroll_samples", &self.enroll_samples)
            .field("duplicate_check", &self.duplicate_check)
            .field("duplicate_delete", &self.duplicate_delete)
            .field("duplicate_area", &self.duplicate_area)
            .field("poll_interval", &self.poll_interval)
            .field("cmd_timeout", &self.cmd_timeout)
            .field("address", &format!("0x{:08X}", self.address))
            .field("shield", &self.shield.is_some())
            .field("debug_ssm", &self.debug_ssm)
            .finish()
    }
}
