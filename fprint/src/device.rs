//! Device sessions
//!
//! A [`Device`] owns one driver instance and runs at most one action on it at
//! a time. Every entry point checks its preconditions synchronously, in a
//! fixed order, before the driver is touched:
//!
//! 1. caller token already cancelled → `Cancelled`
//! 2. `probe`/`open` need a closed device, everything else an open one
//! 3. another action in flight or the device suspended → `Busy`
//! 4. missing capability or feature → `NotSupported`
//! 5. bad input, e.g. a print from another device → `DataInvalid`
//! 6. sensor-engaging actions sample the thermal model → `TooHot`
//!
//! An admitted action runs as a spawned task holding the driver lock. Its
//! result is validated, the session state is updated and only then is the
//! returned [`Task`] resolved.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fprint_core::{
    Action, ActionContext, CancelBridge, CancelHook, Capabilities, Driver, DriverDescriptor,
    EnrollProgressFn, FingerStatusSender, MatchFn, ProbeInfo, ThermalModel,
};
use fprint_types::{Error, Features, FingerStatus, Image, Print, Result, ScanType, Temperature};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::{Job, MatchResult, Outcome};
use crate::task::Task;

/// Shortest pause between two thermal samples while an action runs
const THERMAL_RECHECK: Duration = Duration::from_millis(100);

/// Device id used until probing reports a better one
pub const DEFAULT_DEVICE_ID: &str = "0";

/// Session for one attached fingerprint device
///
/// Cheap to clone; all clones drive the same session.
///
/// # Examples
///
/// ```no_run
/// use fprint::{CancellationToken, Device, Print};
/// use fprint::mafp::{emulator::SensorEmulator, MafpConfig, MafpDriver};
///
/// # #[tokio::main]
/// # async fn main() -> fprint::Result<()> {
/// let (transport, sensor) = SensorEmulator::new().spawn();
/// let device = Device::new(Box::new(MafpDriver::new(Box::new(transport), MafpConfig::new())));
/// let cancel = CancellationToken::new();
///
/// device.open(&cancel).await?;
/// sensor.touch_times(1, device.nr_enroll_stages() as usize);
/// let print = device.enroll(Print::new(), &cancel, None).await?;
/// println!("enrolled {:?}", print.finger());
/// device.close(&cancel).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Device {
    inner: Arc<Inner>,
}

struct Inner {
    descriptor: DriverDescriptor,
    caps: Capabilities,
    cancel_hook: Option<Arc<dyn CancelHook>>,
    supports_suspend: bool,
    driver: tokio::sync::Mutex<Box<dyn Driver>>,
    state: Mutex<State>,
    finger: FingerStatusSender,
    removed: watch::Sender<bool>,
}

struct State {
    open: bool,
    removed: bool,
    removal_notified: bool,
    suspended: bool,
    /// The running action acknowledged a suspend and waits for resume
    parked: bool,
    resuming: bool,
    current: Option<CancelBridge>,
    suspend_waiter: Option<oneshot::Sender<Result<()>>>,
    device_id: String,
    name: String,
    thermal: ThermalModel,
}

#[derive(Default)]
struct Callbacks {
    progress: Option<EnrollProgressFn>,
    on_match: Option<MatchFn>,
}

enum Admit {
    Run,
    /// Succeed without involving the driver
    Skip,
}

impl Device {
    /// Create a closed device session around `driver`
    pub fn new(mut driver: Box<dyn Driver>) -> Self {
        let caps = Capabilities::probe(&mut *driver);
        let descriptor = driver.descriptor().clone();
        let (finger, _) = watch::channel(FingerStatus::empty());
        let (removed, _) = watch::channel(false);

        debug!(driver = descriptor.id(), ?caps, "Creating device session");

        Self {
            inner: Arc::new(Inner {
                caps,
                cancel_hook: driver.cancel_hook(),
                supports_suspend: driver.supports_suspend(),
                state: Mutex::new(State {
                    open: false,
                    removed: false,
                    removal_notified: false,
                    suspended: false,
                    parked: false,
                    resuming: false,
                    current: None,
                    suspend_waiter: None,
                    device_id: DEFAULT_DEVICE_ID.to_string(),
                    name: descriptor.full_name().to_string(),
                    thermal: ThermalModel::new(descriptor.thermal()),
                }),
                descriptor,
                driver: tokio::sync::Mutex::new(driver),
                finger: Arc::new(finger),
                removed,
            }),
        }
    }

    // Identity and observable state

    /// Static description of the driver
    pub fn descriptor(&self) -> &DriverDescriptor {
        &self.inner.descriptor
    }

    /// Id of the driver handling this device
    pub fn driver_id(&self) -> &str {
        self.inner.descriptor.id()
    }

    /// Id of this device, unique among devices of the same driver
    pub fn device_id(&self) -> String {
        self.inner.state.lock().device_id.clone()
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    /// Features the driver supports
    pub fn features(&self) -> Features {
        self.inner.descriptor.features()
    }

    /// Check if all of `feature` is supported
    pub fn has_feature(&self, feature: Features) -> bool {
        self.features().contains(feature)
    }

    /// Whether the sensor is pressed or swiped
    pub fn scan_type(&self) -> ScanType {
        self.inner.descriptor.scan_type()
    }

    /// Number of scans an enrollment takes
    pub fn nr_enroll_stages(&self) -> u32 {
        self.inner.descriptor.nr_enroll_stages()
    }

    /// Check if the device is open
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    /// Check if the device was unplugged
    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().removed
    }

    /// Check if the device is suspended
    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Action currently in flight
    pub fn current_action(&self) -> Option<Action> {
        self.inner.state.lock().current.as_ref().map(CancelBridge::action)
    }

    /// Current finger status reported by the driver
    pub fn finger_status(&self) -> FingerStatus {
        *self.inner.finger.borrow()
    }

    /// Subscribe to finger status changes
    pub fn watch_finger_status(&self) -> watch::Receiver<FingerStatus> {
        self.inner.finger.subscribe()
    }

    /// Sensor temperature, sampled now
    pub fn temperature(&self) -> Temperature {
        self.inner.state.lock().thermal.refresh()
    }

    /// Overwrite the thermal estimate
    #[doc(hidden)]
    pub fn set_thermal_ratio(&self, ratio: f64) {
        self.inner.state.lock().thermal.set_ratio(ratio);
    }

    /// Flips to `true` once, after removal and with no action pending
    pub fn watch_removed(&self) -> watch::Receiver<bool> {
        self.inner.removed.subscribe()
    }

    /// Wait for the removal notification
    pub async fn removed(&self) {
        let mut removed = self.watch_removed();
        let _ = removed.wait_for(|removed| *removed).await;
    }

    // Actions

    /// Let the driver identify the device before it is opened
    pub fn probe(&self, cancel: &CancellationToken) -> Task<ProbeInfo> {
        self.start(
            Job::Probe,
            cancel,
            Callbacks::default(),
            |_, _| Ok(Admit::Run),
            Outcome::into_probe,
        )
    }

    /// Open the device
    pub fn open(&self, cancel: &CancellationToken) -> Task<()> {
        self.start(
            Job::Open,
            cancel,
            Callbacks::default(),
            |_, _| Ok(Admit::Run),
            Outcome::into_unit,
        )
    }

    /// Close the device; it counts as closed even if the driver fails
    pub fn close(&self, cancel: &CancellationToken) -> Task<()> {
        self.start(
            Job::Close,
            cancel,
            Callbacks::default(),
            |_, _| Ok(Admit::Run),
            Outcome::into_unit,
        )
    }

    /// Enroll a finger into `template`
    ///
    /// `template` is either empty ([`Print::new`] plus metadata) or a print
    /// of this device to update, which needs [`Features::UPDATE_PRINT`].
    pub fn enroll(
        &self,
        template: Print,
        cancel: &CancellationToken,
        progress: Option<EnrollProgressFn>,
    ) -> Task<Print> {
        let existing = (!template.is_template()).then(|| template.clone());

        self.start(
            Job::Enroll { template },
            cancel,
            Callbacks {
                progress,
                on_match: None,
            },
            move |inner, state| {
                if !inner.caps.enroll {
                    return Err(Error::not_supported("Device has no enroll support"));
                }
                if let Some(existing) = &existing {
                    if !inner.descriptor.features().contains(Features::UPDATE_PRINT) {
                        return Err(Error::data_invalid(
                            "Device cannot update an existing print",
                        ));
                    }
                    inner.require_compatible(state, existing)?;
                }
                Ok(Admit::Run)
            },
            Outcome::into_print,
        )
    }

    /// Match one scan against `print`
    pub fn verify(
        &self,
        print: &Print,
        cancel: &CancellationToken,
        on_match: Option<MatchFn>,
    ) -> Task<MatchResult> {
        self.start(
            Job::Verify {
                print: print.clone(),
            },
            cancel,
            Callbacks {
                progress: None,
                on_match,
            },
            |inner, state| {
                inner.require(inner.caps.verify, Features::VERIFY, "verification")?;
                inner.require_compatible(state, print)?;
                Ok(Admit::Run)
            },
            Outcome::into_match,
        )
    }

    /// Match one scan against every print of `gallery`
    ///
    /// The gallery is copied; changing it afterwards does not affect the
    /// running action.
    pub fn identify(
        &self,
        gallery: &[Print],
        cancel: &CancellationToken,
        on_match: Option<MatchFn>,
    ) -> Task<MatchResult> {
        self.start(
            Job::Identify {
                gallery: gallery.to_vec(),
            },
            cancel,
            Callbacks {
                progress: None,
                on_match,
            },
            |inner, state| {
                inner.require(inner.caps.identify, Features::IDENTIFY, "identification")?;
                gallery
                    .iter()
                    .try_for_each(|print| inner.require_compatible(state, print))?;
                Ok(Admit::Run)
            },
            Outcome::into_match,
        )
    }

    /// Capture one image, optionally waiting for a finger first
    pub fn capture(&self, wait_for_finger: bool, cancel: &CancellationToken) -> Task<Image> {
        self.start(
            Job::Capture { wait_for_finger },
            cancel,
            Callbacks::default(),
            |inner, _| {
                inner.require(inner.caps.capture, Features::CAPTURE, "capture")?;
                Ok(Admit::Run)
            },
            Outcome::into_image,
        )
    }

    /// Delete a print from device storage
    ///
    /// Succeeds without doing anything when the device keeps no deletable
    /// prints.
    pub fn delete_print(&self, print: &Print, cancel: &CancellationToken) -> Task<()> {
        self.start(
            Job::Delete {
                print: print.clone(),
            },
            cancel,
            Callbacks::default(),
            |inner, state| {
                if !inner.caps.storage
                    || !inner.descriptor.features().contains(Features::STORAGE_DELETE)
                {
                    return Ok(Admit::Skip);
                }
                inner.require_compatible(state, print)?;
                Ok(Admit::Run)
            },
            Outcome::into_unit,
        )
    }

    /// List the prints stored on the device
    pub fn list_prints(&self, cancel: &CancellationToken) -> Task<Vec<Print>> {
        self.start(
            Job::List,
            cancel,
            Callbacks::default(),
            |inner, _| {
                inner.require(inner.caps.storage, Features::STORAGE, "storage")?;
                Ok(Admit::Run)
            },
            Outcome::into_prints,
        )
    }

    /// Delete every print stored on the device
    pub fn clear_storage(&self, cancel: &CancellationToken) -> Task<()> {
        self.start(
            Job::ClearStorage,
            cancel,
            Callbacks::default(),
            |inner, _| {
                inner.require(inner.caps.storage, Features::STORAGE, "storage")?;
                inner.require(inner.caps.clear, Features::STORAGE_CLEAR, "storage clearing")?;
                Ok(Admit::Run)
            },
            Outcome::into_unit,
        )
    }

    fn start<T, C>(
        &self,
        job: Job,
        cancel: &CancellationToken,
        callbacks: Callbacks,
        check: C,
        extract: fn(Outcome) -> Result<T>,
    ) -> Task<T>
    where
        T: Send + 'static,
        C: FnOnce(&Inner, &State) -> Result<Admit>,
    {
        let action = job.action();
        if let Err(e) = runtime() {
            return Task::ready(Err(e));
        }

        let inner = &self.inner;
        let mut state = inner.state.lock();
        match inner.admit(&mut state, action, cancel, check) {
            Err(e) => {
                debug!(%action, error = %e, "Action refused");
                return Task::ready(Err(e));
            }
            Ok(Admit::Skip) => {
                debug!(%action, "Nothing for the driver to do");
                return Task::ready(extract(Outcome::Done));
            }
            Ok(Admit::Run) => {}
        }

        let bridge = CancelBridge::new(
            action,
            cancel,
            inner.cancel_hook.clone(),
            inner.finger.clone(),
        );
        state.current = Some(bridge.clone());
        drop(state);

        if action == Action::Open {
            inner.finger.send_replace(FingerStatus::empty());
        }
        debug!(%action, "Action started");

        let ctx = ActionContext::new(bridge)
            .with_enroll_progress(callbacks.progress)
            .with_match_callback(callbacks.on_match);
        let (task, tx) = Task::pending();
        tokio::spawn(run(self.inner.clone(), job, ctx, tx, extract));
        task
    }

    /// Mark the device as unplugged
    ///
    /// A running action is cancelled with `Removed`. The removal notification
    /// fires once no action is pending.
    pub fn mark_removed(&self) {
        let mut state = self.inner.state.lock();
        if state.removed {
            return;
        }
        state.removed = true;
        info!(driver = self.driver_id(), "Device removed");

        match state.current.clone() {
            Some(bridge) => {
                drop(state);
                bridge.cancel(Some(Error::Removed));
            }
            None => {
                state.removal_notified = true;
                drop(state);
                self.inner.removed.send_replace(true);
            }
        }
    }

    // Power management

    /// Prepare for system suspend
    ///
    /// With an action in flight this completes once the action has finished,
    /// has been cancelled with `Busy`, or has been parked by the driver.
    pub fn suspend(&self) -> Task<()> {
        if let Err(e) = runtime() {
            return Task::ready(Err(e));
        }

        let mut state = self.inner.state.lock();
        if state.suspend_waiter.is_some() || state.resuming || state.suspended {
            return Task::ready(Err(Error::Busy));
        }
        if state.removed {
            return Task::ready(Err(Error::Removed));
        }

        let Some(bridge) = state.current.clone() else {
            state.suspended = true;
            debug!("Idle device suspended");
            return Task::ready(Ok(()));
        };

        let (task, tx) = Task::pending();
        state.suspend_waiter = Some(tx);
        drop(state);

        let action = bridge.action();
        if !action.is_long_running() {
            debug!(%action, "Suspending once the action finishes");
        } else if self.inner.supports_suspend {
            debug!(%action, "Asking the action to park");
            let ack = bridge.request_suspend();
            tokio::spawn(park(self.inner.clone(), ack));
        } else {
            debug!(%action, "Driver cannot park, cancelling the action");
            bridge.cancel(Some(Error::Busy));
        }
        task
    }

    /// Undo [`Device::suspend`], continuing a parked action
    pub fn resume(&self) -> Task<()> {
        let mut state = self.inner.state.lock();
        if state.suspend_waiter.is_some() || state.resuming || !state.suspended {
            return Task::ready(Err(Error::Busy));
        }
        if state.removed {
            return Task::ready(Err(Error::Removed));
        }

        let parked = state.current.clone().filter(|_| state.parked);
        let Some(bridge) = parked else {
            state.suspended = false;
            debug!("Device resumed");
            return Task::ready(Ok(()));
        };
        if let Err(e) = runtime() {
            return Task::ready(Err(e));
        }

        state.resuming = true;
        let ack = bridge.request_resume();
        drop(state);

        debug!(action = %bridge.action(), "Resuming parked action");
        let (task, tx) = Task::pending();
        tokio::spawn(unpark(self.inner.clone(), ack, tx));
        task
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Device")
            .field("driver", &self.inner.descriptor.id())
            .field("device_id", &state.device_id)
            .field("open", &state.open)
            .field("removed", &state.removed)
            .field("suspended", &state.suspended)
            .field("current", &state.current.as_ref().map(CancelBridge::action))
            .finish()
    }
}

impl Inner {
    fn admit<C>(
        &self,
        state: &mut State,
        action: Action,
        cancel: &CancellationToken,
        check: C,
    ) -> Result<Admit>
    where
        C: FnOnce(&Inner, &State) -> Result<Admit>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match action {
            Action::Probe | Action::Open if state.open => return Err(Error::AlreadyOpen),
            Action::Probe | Action::Open => {}
            _ if !state.open => return Err(Error::NotOpen),
            _ => {}
        }

        if state.current.is_some() || state.suspended {
            return Err(Error::Busy);
        }

        let admit = check(self, state)?;

        // The attempt counts as sensor use even when it is refused
        if matches!(admit, Admit::Run) && action.is_long_running() {
            if state.thermal.update(true) == Temperature::Hot {
                state.thermal.update(false);
                return Err(Error::TooHot);
            }
        }

        Ok(admit)
    }

    fn require(&self, capability: bool, feature: Features, what: &str) -> Result<()> {
        if capability && self.descriptor.features().contains(feature) {
            Ok(())
        } else {
            Err(Error::not_supported(format!("Device has no {what} support")))
        }
    }

    fn require_compatible(&self, state: &State, print: &Print) -> Result<()> {
        if print.is_compatible(self.descriptor.id(), &state.device_id) {
            Ok(())
        } else {
            Err(Error::data_invalid(format!(
                "Print belongs to {}/{}, not {}/{}",
                print.driver(),
                print.device_id(),
                self.descriptor.id(),
                state.device_id
            )))
        }
    }

    /// Settle the session after an action and produce the final result
    fn complete(
        &self,
        action: Action,
        bridge: &CancelBridge,
        result: Result<Outcome>,
    ) -> Result<Outcome> {
        let result = match result {
            Err(Error::Cancelled) => Err(bridge.reason().unwrap_or(Error::Cancelled)),
            other => other,
        };

        let mut state = self.state.lock();
        let result = if state.removed && !(action == Action::Open && result.is_ok()) {
            Err(Error::Removed)
        } else {
            result
        };

        match (action, &result) {
            (Action::Open, Ok(_)) => {
                state.open = true;
                info!(driver = self.descriptor.id(), device_id = %state.device_id, "Device opened");
            }
            (Action::Close, _) => {
                state.open = false;
                info!(driver = self.descriptor.id(), device_id = %state.device_id, "Device closed");
            }
            (Action::Probe, Ok(Outcome::Probed(info))) => {
                if let Some(device_id) = &info.device_id {
                    state.device_id = device_id.clone();
                }
                if let Some(name) = &info.name {
                    state.name = name.clone();
                }
            }
            _ => {}
        }

        if action.is_long_running() {
            state.thermal.update(false);
        }
        state.current = None;
        state.parked = false;

        if let Some(waiter) = state.suspend_waiter.take() {
            state.suspended = true;
            debug!(%action, "Device suspended after the action finished");
            let _ = waiter.send(Ok(()));
        }

        let notify_removal = state.removed && !state.removal_notified;
        state.removal_notified |= notify_removal;
        drop(state);

        self.finger.send_replace(FingerStatus::empty());
        if notify_removal {
            self.removed.send_replace(true);
        }

        match &result {
            Ok(_) => debug!(%action, "Action completed"),
            Err(e) => debug!(%action, error = %e, "Action failed"),
        }
        result
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.state.get_mut().open {
            warn!(driver = self.descriptor.id(), "Device dropped while still open");
        }
    }
}

fn runtime() -> Result<()> {
    Handle::try_current()
        .map(|_| ())
        .map_err(|_| Error::general("actions need a Tokio runtime"))
}

/// Body of the task spawned for every admitted action
async fn run<T>(
    inner: Arc<Inner>,
    job: Job,
    ctx: ActionContext,
    tx: oneshot::Sender<Result<T>>,
    extract: fn(Outcome) -> Result<T>,
) {
    let action = job.action();
    let bridge = ctx.bridge().clone();

    let forwarder = bridge.spawn_forwarder();
    let watchdog = (action.is_long_running() && inner.descriptor.thermal().is_enabled())
        .then(|| tokio::spawn(thermal_watchdog(inner.clone(), bridge.clone())));

    let result = {
        let mut driver = inner.driver.lock().await;
        job.run(&mut **driver, &ctx).await
    };

    for handle in [forwarder, watchdog].into_iter().flatten() {
        handle.abort();
    }

    let device_id = inner.state.lock().device_id.clone();
    let result = job.check(result, &ctx, inner.descriptor.id(), &device_id);
    drop(ctx);

    let result = inner.complete(action, &bridge, result);
    if tx.send(result.and_then(extract)).is_err() {
        debug!(%action, "Result dropped, nobody is waiting for it");
    }
}

/// Cancel the running action with `TooHot` once the sensor overheats
async fn thermal_watchdog(inner: Arc<Inner>, bridge: CancelBridge) {
    loop {
        let Some(wait) = inner.state.lock().thermal.next_transition() else {
            return;
        };
        tokio::time::sleep(wait.max(THERMAL_RECHECK)).await;

        let temperature = inner.state.lock().thermal.refresh();
        if temperature == Temperature::Hot {
            warn!(action = %bridge.action(), "Sensor overheated, cancelling");
            bridge.cancel(Some(Error::TooHot));
            return;
        }
    }
}

/// Wait for the driver to acknowledge a park request
async fn park(inner: Arc<Inner>, ack: oneshot::Receiver<Result<()>>) {
    match ack.await {
        Ok(Ok(())) => {
            let mut state = inner.state.lock();
            if let Some(waiter) = state.suspend_waiter.take() {
                state.suspended = true;
                state.parked = true;
                debug!("Action parked, device suspended");
                let _ = waiter.send(Ok(()));
            }
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Driver refused to park, cancelling");
            let current = inner.state.lock().current.clone();
            if let Some(bridge) = current {
                bridge.cancel(Some(Error::Busy));
            }
        }
        // The action ended first; completion resolves the suspend
        Err(_) => {}
    }
}

async fn unpark(
    inner: Arc<Inner>,
    ack: oneshot::Receiver<Result<()>>,
    tx: oneshot::Sender<Result<()>>,
) {
    let result = ack.await.unwrap_or(Ok(()));
    {
        let mut state = inner.state.lock();
        state.suspended = false;
        state.parked = false;
        state.resuming = false;
    }
    if let Err(e) = &result {
        warn!(error = %e, "Parked action failed to resume");
    }
    let _ = tx.send(result);
}
