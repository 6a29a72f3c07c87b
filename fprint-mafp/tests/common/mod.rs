//! Shared helpers for the driver tests.
//!
//! Every test drives a [`MafpDriver`] against the sensor emulator directly,
//! with detached action contexts and no device session in between.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fprint_core::{Action, ActionContext, Driver, Enroll, EnrollProgressFn};
use fprint_mafp::emulator::{SensorEmulator, SensorHandle};
use fprint_mafp::{MafpConfig, MafpDriver};
use fprint_types::{Error, Finger, Print};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub const STAGES: u32 = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Driver settings that keep polling fast
pub fn fast_config() -> MafpConfig {
    MafpConfig::new()
        .with_enroll_samples(STAGES)
        .with_poll_interval(Duration::from_millis(1))
        .with_cmd_timeout(Duration::from_secs(1))
        .with_data_timeout(Duration::from_secs(1))
}

pub struct Rig {
    pub driver: MafpDriver,
    pub sensor: SensorHandle,
}

impl Rig {
    pub fn new(emulator: SensorEmulator, config: MafpConfig) -> Self {
        init_tracing();
        let (transport, sensor) = emulator.spawn();
        Self {
            driver: MafpDriver::new(Box::new(transport), config),
            sensor,
        }
    }

    /// Default emulator, fast config
    pub fn standard() -> Self {
        Self::new(SensorEmulator::new(), fast_config())
    }

    pub fn context(&self, action: Action) -> ActionContext {
        ActionContext::detached(action, self.driver.cancel_hook())
    }

    pub async fn open(&mut self) {
        let ctx = self.context(Action::Open);
        self.driver.open(&ctx).await.expect("open");
    }

    /// Enroll `finger` with enough touches for every stage
    pub async fn enroll(&mut self, finger: u32, user: &str) -> Result<Print, Error> {
        self.sensor.touch_times(finger, STAGES as usize);
        let ctx = self.context(Action::Enroll);
        self.driver.enroll(&ctx, template(user)).await
    }
}

pub fn template(user: &str) -> Print {
    Print::new()
        .with_finger(Finger::RightIndex)
        .with_username(user)
}

/// Progress callback recording `(stage, retry error)` pairs
pub fn progress_recorder() -> (EnrollProgressFn, Arc<Mutex<Vec<(u32, Option<Error>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: EnrollProgressFn = Box::new(move |stage: u32, _print: Option<&Print>, error: Option<&Error>| {
        sink.lock().push((stage, error.cloned()));
    });
    (callback, seen)
}
