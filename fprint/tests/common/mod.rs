//! Shared helpers for the session tests.
//!
//! [`MockDriver`] implements every capability and records which entry points
//! were reached. Its behaviour is steered through [`Controls`], which the
//! test keeps after the driver moved into a [`Device`].

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fprint::mafp::emulator::{SensorEmulator, SensorHandle};
use fprint::mafp::{MafpConfig, MafpDriver};
use fprint::{
    Action, CancellationToken, Device, DriverDescriptor, Error, Features, FingerStatus, Image,
    MatchFn, Print, PrintKind, ProbeInfo, Result, RetryKind, ThermalConfig,
};
use fprint_core::{
    ActionContext, CancelHook, Capture, Driver, Enroll, Identify, Storage, Verify,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub const STAGES: u32 = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn all_features() -> Features {
    Features::VERIFY
        | Features::IDENTIFY
        | Features::CAPTURE
        | Features::STORAGE
        | Features::STORAGE_LIST
        | Features::STORAGE_DELETE
        | Features::STORAGE_CLEAR
        | Features::UPDATE_PRINT
}

pub fn descriptor(features: Features) -> DriverDescriptor {
    DriverDescriptor::new("mock", "Mock Sensor")
        .with_features(features)
        .with_enroll_stages(STAGES)
        .with_thermal(ThermalConfig::disabled())
}

/// How the mock answers a suspend request while holding
#[derive(Debug, Clone, PartialEq)]
pub enum Park {
    Accept,
    Refuse,
}

#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Sensor-engaging and storage actions wait for [`Controls::release`]
    pub hold: bool,
    /// Hold inside a critical section
    pub critical: bool,
    pub park: Option<Park>,
    pub probe: ProbeInfo,
    pub fail_close: bool,
    /// Enroll hands back the untouched template
    pub unfilled: bool,
    /// Verify matches the print it was given
    pub verify_match: bool,
    /// Verify fails with a retry instead of reporting
    pub retry: bool,
    /// Verify and identify finish without reporting anything
    pub silent: bool,
    /// Identify reports this gallery entry
    pub identify_index: Option<usize>,
    /// Identify reports a print that is not in the gallery
    pub rogue: bool,
}

#[derive(Default)]
pub struct Controls {
    calls: Mutex<Vec<Action>>,
    cancels: AtomicUsize,
    resumes: AtomicUsize,
    entered: Notify,
    release: Notify,
    behaviour: Mutex<Behaviour>,
    stored: Mutex<Vec<Print>>,
}

impl Controls {
    /// Driver entry points reached so far, in order
    pub fn calls(&self) -> Vec<Action> {
        self.calls.lock().clone()
    }

    pub fn count(&self, action: Action) -> usize {
        self.calls.lock().iter().filter(|a| **a == action).count()
    }

    /// How often the cancel hook ran
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// Wait until the running action is holding
    pub async fn entered(&self) {
        self.entered.notified().await
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn set(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock());
    }

    pub fn stored(&self) -> Vec<Print> {
        self.stored.lock().clone()
    }

    fn record(&self, action: Action) {
        self.calls.lock().push(action);
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour.lock().clone()
    }
}

struct Hook(Arc<Controls>);

impl CancelHook for Hook {
    fn cancel(&self, _action: Action) {
        self.0.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockDriver {
    descriptor: DriverDescriptor,
    controls: Arc<Controls>,
    suspend: bool,
    capture: bool,
}

impl MockDriver {
    pub fn new(descriptor: DriverDescriptor) -> (Self, Arc<Controls>) {
        let controls = Arc::new(Controls::default());
        let capture = descriptor.features().contains(Features::CAPTURE);
        let driver = Self {
            descriptor,
            controls: controls.clone(),
            suspend: false,
            capture,
        };
        (driver, controls)
    }

    pub fn with_suspend(mut self) -> Self {
        self.suspend = true;
        self
    }

    /// Drop the capture capability while still declaring the feature
    pub fn without_capture(mut self) -> Self {
        self.capture = false;
        self
    }

    async fn hold(&self, ctx: &ActionContext) -> Result<()> {
        let behaviour = self.controls.behaviour();
        ctx.report_finger_status(FingerStatus::NEEDED);

        if behaviour.critical {
            let section = ctx.critical_section();
            self.controls.entered.notify_one();
            self.controls.release.notified().await;
            drop(section);
            return if ctx.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            };
        }
        if !behaviour.hold {
            return Ok(());
        }

        self.controls.entered.notify_one();
        let mut park = behaviour.park;
        loop {
            tokio::select! {
                _ = self.controls.release.notified() => return Ok(()),
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                _ = ctx.suspend_requested(), if park.is_some() => {
                    match park.take() {
                        Some(Park::Accept) => {
                            ctx.suspend_complete(Ok(()));
                            tokio::select! {
                                _ = ctx.resume_requested() => {}
                                _ = ctx.cancelled() => return Err(Error::Cancelled),
                            }
                            self.controls.resumes.fetch_add(1, Ordering::SeqCst);
                            ctx.resume_complete(Ok(()));
                            return Ok(());
                        }
                        _ => ctx.suspend_complete(Err(Error::Busy)),
                    }
                }
            }
        }
    }
}

fn scanned() -> Print {
    let mut print = Print::for_device("mock", "");
    print.set_data(PrintKind::Raw, &b"scan"[..]);
    print
}

#[async_trait]
impl Driver for MockDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    async fn probe(&mut self, _ctx: &ActionContext) -> Result<ProbeInfo> {
        self.controls.record(Action::Probe);
        Ok(self.controls.behaviour().probe)
    }

    async fn open(&mut self, _ctx: &ActionContext) -> Result<()> {
        self.controls.record(Action::Open);
        Ok(())
    }

    async fn close(&mut self, _ctx: &ActionContext) -> Result<()> {
        self.controls.record(Action::Close);
        if self.controls.behaviour().fail_close {
            return Err(Error::general("sensor did not answer"));
        }
        Ok(())
    }

    fn enroller(&mut self) -> Option<&mut dyn Enroll> {
        Some(self)
    }

    fn verifier(&mut self) -> Option<&mut dyn Verify> {
        Some(self)
    }

    fn identifier(&mut self) -> Option<&mut dyn Identify> {
        Some(self)
    }

    fn capturer(&mut self) -> Option<&mut dyn Capture> {
        if self.capture { Some(self) } else { None }
    }

    fn storage(&mut self) -> Option<&mut dyn Storage> {
        Some(self)
    }

    fn cancel_hook(&self) -> Option<Arc<dyn CancelHook>> {
        Some(Arc::new(Hook(self.controls.clone())))
    }

    fn supports_suspend(&self) -> bool {
        self.suspend
    }
}

#[async_trait]
impl Enroll for MockDriver {
    async fn enroll(&mut self, ctx: &ActionContext, mut template: Print) -> Result<Print> {
        self.controls.record(Action::Enroll);
        self.hold(ctx).await?;

        for stage in 1..=STAGES {
            ctx.enroll_progress(stage, Some(&template), None);
        }
        if self.controls.behaviour().unfilled {
            return Ok(template);
        }

        let index = self.controls.stored.lock().len();
        template.set_data(PrintKind::Raw, format!("template-{index}").into_bytes());
        template.set_device_stored(true);
        self.controls.stored.lock().push(template.clone());
        Ok(template)
    }
}

#[async_trait]
impl Verify for MockDriver {
    async fn verify(&mut self, ctx: &ActionContext, print: &Print) -> Result<()> {
        self.controls.record(Action::Verify);
        self.hold(ctx).await?;

        let behaviour = self.controls.behaviour();
        if behaviour.retry {
            return Err(Error::Retry(RetryKind::CenterFinger));
        }
        if !behaviour.silent {
            let matched = behaviour.verify_match.then(|| print.clone());
            ctx.report_finger_status(FingerStatus::PRESENT);
            ctx.report_match(matched, Some(scanned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Identify for MockDriver {
    async fn identify(&mut self, ctx: &ActionContext, gallery: &[Print]) -> Result<()> {
        self.controls.record(Action::Identify);
        self.hold(ctx).await?;

        let behaviour = self.controls.behaviour();
        if behaviour.silent {
            return Ok(());
        }
        let matched = if behaviour.rogue {
            Some(scanned())
        } else {
            behaviour.identify_index.and_then(|i| gallery.get(i).cloned())
        };
        ctx.report_match(matched, Some(scanned()));
        Ok(())
    }
}

#[async_trait]
impl Capture for MockDriver {
    async fn capture(&mut self, ctx: &ActionContext, _wait_for_finger: bool) -> Result<Image> {
        self.controls.record(Action::Capture);
        self.hold(ctx).await?;
        Image::new(4, 4, 19.7, vec![0x80; 16]).ok_or_else(|| Error::general("bad image"))
    }
}

#[async_trait]
impl Storage for MockDriver {
    async fn list(&mut self, ctx: &ActionContext) -> Result<Vec<Print>> {
        self.controls.record(Action::List);
        self.hold(ctx).await?;
        Ok(self.controls.stored())
    }

    async fn delete(&mut self, ctx: &ActionContext, print: &Print) -> Result<()> {
        self.controls.record(Action::Delete);
        self.hold(ctx).await?;
        let mut stored = self.controls.stored.lock();
        let before = stored.len();
        stored.retain(|p| p.data() != print.data());
        if stored.len() == before {
            return Err(Error::DataNotFound);
        }
        Ok(())
    }

    async fn clear(&mut self, ctx: &ActionContext) -> Result<()> {
        self.controls.record(Action::ClearStorage);
        self.hold(ctx).await?;
        self.controls.stored.lock().clear();
        Ok(())
    }

    fn can_clear(&self) -> bool {
        self.descriptor.features().contains(Features::STORAGE_CLEAR)
    }
}

/// Session over a mock driver with the given features
pub fn mock_device(features: Features) -> (Device, Arc<Controls>) {
    init_tracing();
    let (driver, controls) = MockDriver::new(descriptor(features));
    (Device::new(Box::new(driver)), controls)
}

/// Session over a mock driver that can park long actions
pub fn parking_device() -> (Device, Arc<Controls>) {
    init_tracing();
    let (driver, controls) = MockDriver::new(descriptor(all_features()));
    (Device::new(Box::new(driver.with_suspend())), controls)
}

pub async fn opened(features: Features) -> (Device, Arc<Controls>, CancellationToken) {
    let (device, controls) = mock_device(features);
    let cancel = CancellationToken::new();
    device.open(&cancel).await.expect("open");
    (device, controls, cancel)
}

/// Print enrolled through the session
pub async fn enrolled(device: &Device, cancel: &CancellationToken, user: &str) -> Print {
    device
        .enroll(Print::new().with_username(user), cancel, None)
        .await
        .expect("enroll")
}

/// Print of some other device
pub fn foreign_print() -> Print {
    let mut print = Print::for_device("other", "7");
    print.set_data(PrintKind::Raw, &b"foreign"[..]);
    print
}

/// Match callback recording `(matched, error)` pairs
pub fn match_recorder() -> (MatchFn, Arc<Mutex<Vec<(Option<Print>, Option<Error>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: MatchFn = Box::new(move |matched, _scanned, error| {
        sink.lock().push((matched.cloned(), error.cloned()));
    });
    (callback, seen)
}

/// Driver settings that keep polling fast
pub fn fast_config() -> MafpConfig {
    MafpConfig::new()
        .with_enroll_samples(STAGES)
        .with_poll_interval(Duration::from_millis(1))
        .with_cmd_timeout(Duration::from_secs(1))
        .with_data_timeout(Duration::from_secs(1))
}

/// Session over the MAFP driver talking to the emulator
pub fn mafp_device() -> (Device, SensorHandle) {
    init_tracing();
    let (transport, sensor) = SensorEmulator::new().spawn();
    let driver = MafpDriver::new(Box::new(transport), fast_config());
    (Device::new(Box::new(driver)), sensor)
}
