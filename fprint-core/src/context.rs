//! Per-action context handed to drivers

use std::fmt;
use std::sync::Arc;

use fprint_types::{Error, FingerStatus, Print, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::action::Action;
use crate::cancel::{CancelBridge, CancelHook, CriticalSection};

/// Enroll progress callback: completed stage, print so far, retry error
pub type EnrollProgressFn = Box<dyn FnMut(u32, Option<&Print>, Option<&Error>) + Send>;

/// Match callback: matched print, scanned print, retry error
pub type MatchFn = Box<dyn FnMut(Option<&Print>, Option<&Print>, Option<&Error>) + Send>;

/// What a driver reported during verify or identify
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    pub reported: bool,
    pub matched: Option<Print>,
    pub scanned: Option<Print>,
    pub error: Option<Error>,
}

/// Everything a driver needs while running one action
///
/// Created by the session for each action; a driver only ever sees it by
/// reference.
pub struct ActionContext {
    bridge: CancelBridge,
    progress: Mutex<Option<EnrollProgressFn>>,
    on_match: Mutex<Option<MatchFn>>,
    report: Mutex<MatchReport>,
}

impl ActionContext {
    pub fn new(bridge: CancelBridge) -> Self {
        Self {
            bridge,
            progress: Mutex::new(None),
            on_match: Mutex::new(None),
            report: Mutex::new(MatchReport::default()),
        }
    }

    /// Context not attached to any session, for driving a driver directly
    pub fn detached(action: Action, hook: Option<Arc<dyn CancelHook>>) -> Self {
        Self::new(CancelBridge::detached(action, hook))
    }

    pub fn with_enroll_progress(self, progress: Option<EnrollProgressFn>) -> Self {
        *self.progress.lock() = progress;
        self
    }

    pub fn with_match_callback(self, on_match: Option<MatchFn>) -> Self {
        *self.on_match.lock() = on_match;
        self
    }

    pub fn action(&self) -> Action {
        self.bridge.action()
    }

    pub fn bridge(&self) -> &CancelBridge {
        &self.bridge
    }

    /// Token that fires once cancellation has been delivered to the driver
    pub fn cancellation(&self) -> CancellationToken {
        self.bridge.delivered().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.bridge.delivered().is_cancelled()
    }

    /// Resolves once cancellation has been delivered
    pub async fn cancelled(&self) {
        self.bridge.delivered().cancelled().await
    }

    /// Defer cancellation delivery until the returned guard is dropped
    pub fn critical_section(&self) -> CriticalSection {
        self.bridge.enter()
    }

    pub fn finger_status(&self) -> FingerStatus {
        *self.bridge.finger_status().borrow()
    }

    pub fn report_finger_status(&self, status: FingerStatus) {
        let old = self.bridge.finger_status().send_replace(status);
        if old != status {
            debug!(action = %self.action(), ?status, "Finger status changed");
        }
    }

    /// Report an enroll stage; `error` carries a retry condition
    pub fn enroll_progress(&self, stage: u32, print: Option<&Print>, error: Option<&Error>) {
        match error {
            Some(error) => debug!(stage, %error, "Enroll stage needs a retry"),
            None => debug!(stage, "Enroll stage completed"),
        }

        if let Some(progress) = self.progress.lock().as_mut() {
            progress(stage, print, error);
        }
    }

    /// Report the match outcome of verify or identify
    ///
    /// `matched` is the enrolled print that matched, if any.
    pub fn report_match(&self, matched: Option<Print>, scanned: Option<Print>) {
        {
            let mut report = self.report.lock();
            if report.reported {
                warn!(action = %self.action(), "Match result reported twice, ignoring");
                return;
            }
            report.reported = true;
            report.matched = matched.clone();
            report.scanned = scanned.clone();
        }

        debug!(action = %self.action(), matched = matched.is_some(), "Match reported");
        if let Some(on_match) = self.on_match.lock().as_mut() {
            on_match(matched.as_ref(), scanned.as_ref(), None);
        }
    }

    /// Report a retry condition as the match outcome
    pub fn report_match_error(&self, error: Error) {
        {
            let mut report = self.report.lock();
            if report.reported {
                warn!(action = %self.action(), "Match result reported twice, ignoring");
                return;
            }
            if !error.is_retry() {
                warn!(%error, "Only retry errors are reported as match results");
            }
            report.reported = true;
            report.error = Some(error.clone());
        }

        if let Some(on_match) = self.on_match.lock().as_mut() {
            on_match(None, None, Some(&error));
        }
    }

    pub fn match_report(&self) -> MatchReport {
        self.report.lock().clone()
    }

    /// Resolves once the session asks the running action to park
    pub async fn suspend_requested(&self) {
        self.bridge.suspend_requested().await
    }

    /// Acknowledge a suspend request; an error refuses parking
    pub fn suspend_complete(&self, result: Result<()>) {
        self.bridge.suspend_complete(result)
    }

    /// Resolves once the session asks a parked action to continue
    pub async fn resume_requested(&self) {
        self.bridge.resume_requested().await
    }

    pub fn resume_complete(&self, result: Result<()>) {
        self.bridge.resume_complete(result)
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("bridge", &self.bridge)
            .field("report", &*self.report.lock())
            .finish()
    }
}
