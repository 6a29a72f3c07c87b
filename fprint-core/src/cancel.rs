//! Cancellation bridge and critical sections
//!
//! Every action gets its own internal token, a child of the caller's token,
//! so caller cancellation reaches it through the token tree. The driver never
//! looks at the internal token directly. It sees the *delivered* token, which
//! the bridge only fires when it is safe to do so:
//!
//! ```text
//! caller token ──► internal token ──► forwarder ──► depth > 0 ? set pending
//!                                                            : deliver
//! deliver = fire delivered token + clear finger status + call the cancel hook
//! ```
//!
//! Leaving the outermost critical section delivers a pending cancellation
//! before control returns to the driver. Without a cancel hook no forwarder
//! is started and the action runs to its natural end.
//!
//! Suspend requests travel through the same bridge because they are subject
//! to the same deferral: a suspend that arrives inside a critical section is
//! queued until the section closes.

use std::fmt;
use std::sync::Arc;

use fprint_types::{Error, FingerStatus, Result};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::action::Action;

/// Shared sender for the device's finger status
pub type FingerStatusSender = Arc<watch::Sender<FingerStatus>>;

/// Driver-provided cancellation capability
///
/// Called at most once per action, outside any critical section. The bridge
/// stays locked during the call, so the hook must not block or call back
/// into the action.
pub trait CancelHook: Send + Sync {
    fn cancel(&self, action: Action);
}

/// Links a caller's cancellation token to one running action
#[derive(Clone)]
pub struct CancelBridge {
    inner: Arc<Inner>,
}

struct Inner {
    action: Action,
    internal: CancellationToken,
    delivered: CancellationToken,
    hook: Option<Arc<dyn CancelHook>>,
    finger: FingerStatusSender,
    state: Mutex<State>,
    suspend: Notify,
    resume: Notify,
}

#[derive(Default)]
struct State {
    depth: u32,
    pending: bool,
    reason: Option<Error>,
    suspend_queued: bool,
    suspend_ack: Option<oneshot::Sender<Result<()>>>,
    resume_ack: Option<oneshot::Sender<Result<()>>>,
}

impl CancelBridge {
    pub fn new(
        action: Action,
        external: &CancellationToken,
        hook: Option<Arc<dyn CancelHook>>,
        finger: FingerStatusSender,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                action,
                internal: external.child_token(),
                delivered: CancellationToken::new(),
                hook,
                finger,
                state: Mutex::new(State::default()),
                suspend: Notify::new(),
                resume: Notify::new(),
            }),
        }
    }

    /// Bridge with a fresh caller token and its own finger status channel
    pub fn detached(action: Action, hook: Option<Arc<dyn CancelHook>>) -> Self {
        let (finger, _) = watch::channel(FingerStatus::empty());
        Self::new(action, &CancellationToken::new(), hook, Arc::new(finger))
    }

    pub fn action(&self) -> Action {
        self.inner.action
    }

    pub fn has_hook(&self) -> bool {
        self.inner.hook.is_some()
    }

    /// Token the driver observes
    pub fn delivered(&self) -> &CancellationToken {
        &self.inner.delivered
    }

    /// Whether cancellation was requested, delivered or not
    pub fn is_requested(&self) -> bool {
        self.inner.internal.is_cancelled()
    }

    pub fn finger_status(&self) -> &FingerStatusSender {
        &self.inner.finger
    }

    /// Cancel from the session side; the first reason given wins
    pub fn cancel(&self, reason: Option<Error>) {
        if let Some(reason) = reason {
            let mut state = self.inner.state.lock();
            if state.reason.is_none() {
                state.reason = Some(reason);
            }
        }
        self.inner.internal.cancel();
    }

    /// Error to report instead of `Cancelled`, if the session cancelled
    pub fn reason(&self) -> Option<Error> {
        self.inner.state.lock().reason.clone()
    }

    /// Start forwarding internal cancellation to the driver
    ///
    /// Returns `None` when the driver has no cancel hook.
    pub fn spawn_forwarder(&self) -> Option<JoinHandle<()>> {
        self.inner.hook.as_ref()?;

        let bridge = self.clone();
        Some(tokio::spawn(async move {
            bridge.inner.internal.cancelled().await;
            bridge.fire();
        }))
    }

    /// Handle an internal cancellation: defer inside a critical section,
    /// deliver otherwise
    pub(crate) fn fire(&self) {
        let mut state = self.inner.state.lock();
        if state.depth > 0 {
            debug!(action = %self.inner.action, "Deferring cancellation until critical section ends");
            state.pending = true;
            return;
        }
        self.deliver(&state);
    }

    /// Caller holds the state lock, so no critical section can open meanwhile
    fn deliver(&self, _locked: &State) {
        if self.inner.delivered.is_cancelled() {
            return;
        }

        debug!(action = %self.inner.action, "Delivering cancellation");
        self.inner.delivered.cancel();
        self.inner.finger.send_replace(FingerStatus::empty());
        if let Some(hook) = &self.inner.hook {
            hook.cancel(self.inner.action);
        }
    }

    /// Open a critical section; it ends when the guard is dropped
    pub fn enter(&self) -> CriticalSection {
        self.inner.state.lock().depth += 1;
        CriticalSection {
            bridge: self.clone(),
        }
    }

    fn leave(&self) {
        let resume_suspend = {
            let mut state = self.inner.state.lock();
            debug_assert!(state.depth > 0, "unbalanced critical section");
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 {
                return;
            }

            if std::mem::take(&mut state.pending) {
                self.deliver(&state);
            }
            std::mem::take(&mut state.suspend_queued)
        };

        if resume_suspend {
            debug!(action = %self.inner.action, "Delivering queued suspend request");
            self.inner.suspend.notify_one();
        }
    }

    pub fn critical_depth(&self) -> u32 {
        self.inner.state.lock().depth
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().pending
    }

    /// Ask the running action to park; queued while inside a critical section
    pub fn request_suspend(&self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock();
        state.suspend_ack = Some(tx);
        if state.depth > 0 {
            state.suspend_queued = true;
        } else {
            self.inner.suspend.notify_one();
        }
        rx
    }

    /// Ask a parked action to continue
    pub fn request_resume(&self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.inner.state.lock().resume_ack = Some(tx);
        self.inner.resume.notify_one();
        rx
    }

    pub(crate) async fn suspend_requested(&self) {
        self.inner.suspend.notified().await
    }

    pub(crate) async fn resume_requested(&self) {
        self.inner.resume.notified().await
    }

    pub(crate) fn suspend_complete(&self, result: Result<()>) {
        match self.inner.state.lock().suspend_ack.take() {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => warn!(action = %self.inner.action, "Suspend completion without a request"),
        }
    }

    pub(crate) fn resume_complete(&self, result: Result<()>) {
        match self.inner.state.lock().resume_ack.take() {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => warn!(action = %self.inner.action, "Resume completion without a request"),
        }
    }
}

impl fmt::Debug for CancelBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CancelBridge")
            .field("action", &self.inner.action)
            .field("requested", &self.inner.internal.is_cancelled())
            .field("delivered", &self.inner.delivered.is_cancelled())
            .field("depth", &state.depth)
            .field("pending", &state.pending)
            .finish()
    }
}

/// Scope during which cancellation delivery is deferred
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSection {
    bridge: CancelBridge,
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        self.bridge.leave();
    }
}
