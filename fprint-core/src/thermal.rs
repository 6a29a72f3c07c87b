//! Sensor thermal model
//!
//! Some sensors heat up when they are kept powered for long stretches. The
//! model estimates the sensor temperature from active time only: a ratio in
//! `[0, 1]` moves towards 1 while the sensor is engaged and decays towards 0
//! while it idles, both exponentially. The category is derived from the
//! ratio with a hysteresis band, so it does not flap around a boundary.
//!
//! ```text
//!  active:  r <- 1 - (1 - r) * exp(-dt / hot_seconds)
//!  idle:    r <- r * exp(-dt / cold_seconds)
//!
//!  0 ---- COLD ---- 0.5 ---- HOT ---- 1
//!  | Cold  | Warm            | Hot    |
//!                  ^ a hot sensor stays hot until it drops below 0.5
//! ```
//!
//! The thresholds are chosen so that a sensor starting at the cold boundary
//! turns hot after exactly `hot_seconds` of continuous use and a sensor at the
//! hot boundary is cold again after `cold_seconds` of idling.

use std::f64::consts::E;
use std::time::Duration;

use fprint_types::Temperature;
use tokio::time::Instant;
use tracing::debug;

/// Default time of continuous use after which the sensor is hot
pub const DEFAULT_TEMP_HOT_SECONDS: f64 = 3.0 * 60.0;

/// Default idle time for a hot sensor to be cold again
pub const DEFAULT_TEMP_COLD_SECONDS: f64 = 9.0 * 60.0;

/// Below this ratio the sensor is cold
pub const COLD_THRESHOLD: f64 = 1.0 / (1.0 + E);

/// At or above this ratio the sensor turns hot
pub const HOT_THRESHOLD: f64 = E / (1.0 + E);

/// A hot sensor only counts as warm again once it dropped below this ratio
pub const HOT_RELEASE_THRESHOLD: f64 = 0.5;

/// Per-device time constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalConfig {
    hot_seconds: f64,
    cold_seconds: f64,
}

impl ThermalConfig {
    /// Custom time constants; non-positive values disable the model
    pub fn new(hot_seconds: f64, cold_seconds: f64) -> Self {
        if hot_seconds <= 0.0 || cold_seconds <= 0.0 {
            return Self::disabled();
        }

        Self {
            hot_seconds,
            cold_seconds,
        }
    }

    /// The sensor can run continuously
    pub fn disabled() -> Self {
        Self {
            hot_seconds: -1.0,
            cold_seconds: -1.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.hot_seconds > 0.0
    }

    pub fn hot_seconds(&self) -> f64 {
        self.hot_seconds
    }

    pub fn cold_seconds(&self) -> f64 {
        self.cold_seconds
    }
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            hot_seconds: DEFAULT_TEMP_HOT_SECONDS,
            cold_seconds: DEFAULT_TEMP_COLD_SECONDS,
        }
    }
}

/// Thermal state of one device
#[derive(Debug, Clone)]
pub struct ThermalModel {
    config: ThermalConfig,
    ratio: f64,
    category: Temperature,
    last_update: Instant,
    last_active: bool,
}

impl ThermalModel {
    /// Start out at the upper bound of cold rather than completely cold
    pub fn new(config: ThermalConfig) -> Self {
        Self {
            config,
            ratio: COLD_THRESHOLD,
            category: Temperature::Cold,
            last_update: Instant::now(),
            last_active: false,
        }
    }

    pub fn config(&self) -> ThermalConfig {
        self.config
    }

    /// Current category, as of the last sample
    pub fn category(&self) -> Temperature {
        self.category
    }

    /// Current ratio, as of the last sample
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Whether the sensor has been engaged since the last sample
    pub fn is_active(&self) -> bool {
        self.last_active
    }

    pub fn is_hot(&self) -> bool {
        self.category == Temperature::Hot
    }

    /// Take a sample now and record whether the sensor is engaged from here on
    pub fn update(&mut self, active: bool) -> Temperature {
        self.update_at(Instant::now(), active)
    }

    /// Take a sample without changing the activity state
    pub fn refresh(&mut self) -> Temperature {
        self.update(self.last_active)
    }

    /// Take a sample at `now`
    pub fn update_at(&mut self, now: Instant, active: bool) -> Temperature {
        if !self.config.is_enabled() {
            self.last_update = now;
            self.last_active = active;
            return self.category;
        }

        let passed = now.saturating_duration_since(self.last_update).as_secs_f64();

        if self.last_active {
            let alpha = (-passed / self.config.hot_seconds).exp();
            self.ratio = alpha * self.ratio + 1.0 - alpha;
        } else {
            let alpha = (-passed / self.config.cold_seconds).exp();
            self.ratio *= alpha;
        }
        self.ratio = self.ratio.clamp(0.0, 1.0);

        self.last_update = now;
        self.last_active = active;
        self.recategorize();

        self.category
    }

    /// Force the ratio, e.g. when restoring a persisted estimate
    pub fn set_ratio(&mut self, ratio: f64) {
        if !self.config.is_enabled() {
            return;
        }

        self.ratio = ratio.clamp(0.0, 1.0);
        self.last_update = Instant::now();
        self.recategorize();
    }

    /// Time from the last sample until the category changes, if it ever will
    /// under the current activity state
    pub fn next_transition(&self) -> Option<Duration> {
        if !self.config.is_enabled() {
            return None;
        }

        let target = match (self.last_active, self.category) {
            (true, Temperature::Cold) => COLD_THRESHOLD,
            (true, Temperature::Warm) => HOT_THRESHOLD,
            (true, Temperature::Hot) => return None,
            (false, Temperature::Cold) => return None,
            (false, Temperature::Warm) => COLD_THRESHOLD,
            (false, Temperature::Hot) => HOT_RELEASE_THRESHOLD,
        };

        let seconds = if self.last_active {
            self.config.hot_seconds * ((1.0 - self.ratio) / (1.0 - target)).ln()
        } else {
            self.config.cold_seconds * (self.ratio / target).ln()
        };

        Some(Duration::from_secs_f64(seconds.max(0.0)))
    }

    fn recategorize(&mut self) {
        let old = self.category;

        self.category = if self.ratio < COLD_THRESHOLD {
            Temperature::Cold
        } else if self.ratio >= HOT_THRESHOLD {
            Temperature::Hot
        } else if old == Temperature::Hot && self.ratio >= HOT_RELEASE_THRESHOLD {
            Temperature::Hot
        } else {
            Temperature::Warm
        };

        if old != self.category {
            debug!(
                ratio = self.ratio,
                "Sensor temperature changed from {} to {}", old, self.category
            );
        }
    }
}

impl Default for ThermalModel {
    fn default() -> Self {
        Self::new(ThermalConfig::default())
    }
}
