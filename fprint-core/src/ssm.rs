//! Sequential state machines
//!
//! A driver describes a multi-round hardware exchange as a closed enum of
//! steps and a handler that runs one step at a time. Each step returns the
//! transition to take; returning an error fails the machine.
//!
//! ```text
//!          ┌──────── Next / Jump(s) ────────┐
//!          ▼                                │
//!   ──► step n ── run_step ──► Transition ──┤
//!          │                                ├── Complete ──► Ok(())
//!          │ timeout / cancelled / Err(e)   └── Next past the last step ──► Ok(())
//!          ▼
//!       Err(Timeout | Cancelled | e)
//! ```
//!
//! Steps are awaited one at a time, so exactly one step is current per
//! machine. Cancellation interrupts a step only where it is suspended outside
//! every critical section of its action; a step waiting inside one keeps
//! running until the section closes. A step nests another machine by building it with
//! [`Ssm::child`] and awaiting [`Ssm::run`]; the child's outcome comes back
//! as a plain `Result` and the parent step picks its transition from it.

use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::pin;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use fprint_types::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cancel::CancelBridge;

/// A closed, ordered list of steps
pub trait StepList: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every step, in execution order
    const STEPS: &'static [Self];

    /// Position of this step in [`StepList::STEPS`]
    ///
    /// # Panics
    ///
    /// If the step is not part of `STEPS`; that is a bug in the driver.
    fn index(self) -> usize {
        Self::STEPS
            .iter()
            .position(|step| *step == self)
            .unwrap_or_else(|| panic!("step {self:?} missing from its step list"))
    }

    /// The step after this one, `None` for the last
    fn next(self) -> Option<Self> {
        Self::STEPS.get(self.index() + 1).copied()
    }
}

/// What to do after a step ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// Continue with the following step
    Next,
    /// Continue with the following step after a delay
    NextDelayed(Duration),
    /// Continue with an arbitrary step
    Jump(S),
    /// Continue with an arbitrary step after a delay
    JumpDelayed(S, Duration),
    /// Finish successfully
    Complete,
}

/// Runs the steps of one machine
#[async_trait]
pub trait StepHandler<S: StepList>: Send {
    async fn run_step(&mut self, ssm: &Ssm<S>, step: S) -> Result<Transition<S>>;

    /// Timeout for a single step, overriding the machine's default
    fn step_timeout(&self, _step: S) -> Option<Duration> {
        None
    }
}

/// One machine instance
pub struct Ssm<S: StepList> {
    name: String,
    start: S,
    timeout: Option<Duration>,
    cancellable: Option<CancellationToken>,
    sections: Option<CancelBridge>,
    debug: bool,
}

impl<S: StepList> Ssm<S> {
    /// New machine starting at the first step
    ///
    /// # Panics
    ///
    /// If the step list is empty.
    pub fn new(name: impl Into<String>) -> Self {
        let start = match S::STEPS.first() {
            Some(step) => *step,
            None => panic!("empty step list"),
        };

        Self {
            name: name.into(),
            start,
            timeout: None,
            cancellable: None,
            sections: None,
            debug: false,
        }
    }

    /// Start at another step than the first
    pub fn starting_at(mut self, step: S) -> Self {
        let _ = step.index();
        self.start = step;
        self
    }

    /// Default timeout for every step
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail with [`Error::Cancelled`] once the token fires
    pub fn with_cancellable(mut self, token: CancellationToken) -> Self {
        self.cancellable = Some(token);
        self
    }

    /// Cancel with the action behind `bridge`, respecting its critical
    /// sections
    pub fn with_bridge(mut self, bridge: &CancelBridge) -> Self {
        self.cancellable = Some(bridge.delivered().clone());
        self.sections = Some(bridge.clone());
        self
    }

    /// Log every transition at debug level instead of trace
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Child machine that inherits cancellation, timeout and tracing
    pub fn child<T: StepList>(&self, name: &str) -> Ssm<T> {
        let mut child = Ssm::new(format!("{}/{}", self.name, name))
            .with_debug(self.debug);
        child.timeout = self.timeout;
        child.cancellable = self.cancellable.clone();
        child.sections = self.sections.clone();
        child
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancellable(&self) -> Option<&CancellationToken> {
        self.cancellable.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellable
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Run to a terminal state
    pub async fn run<H>(self, handler: &mut H) -> Result<()>
    where
        H: StepHandler<S> + ?Sized,
    {
        let mut step = self.start;

        loop {
            self.log(format_args!("entering {step:?} ({}/{})", step.index() + 1, S::STEPS.len()));

            let timeout = handler.step_timeout(step).or(self.timeout);
            let outcome = self.guard(timeout, handler.run_step(&self, step)).await;

            let transition = match outcome {
                Ok(transition) => transition,
                Err(e) => {
                    debug!(ssm = %self.name, ?step, error = %e, "State machine failed");
                    return Err(e);
                }
            };

            let (target, delay) = match transition {
                Transition::Next => (step.next(), None),
                Transition::NextDelayed(delay) => (step.next(), Some(delay)),
                Transition::Jump(target) => (Some(target), None),
                Transition::JumpDelayed(target, delay) => (Some(target), Some(delay)),
                Transition::Complete => (None, None),
            };

            let Some(target) = target else {
                self.log(format_args!("completed at {step:?}"));
                return Ok(());
            };

            // Validates the jump target before any delay is spent
            let _ = target.index();

            if let Some(delay) = delay {
                self.guard(None, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }

            step = target;
        }
    }

    async fn guard<T, F>(&self, timeout: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timed = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => fut.await,
            }
        };

        let Some(token) = &self.cancellable else {
            return timed.await;
        };

        let mut timed = pin!(timed);
        let mut cancelled = pin!(token.cancelled());
        poll_fn(|cx| {
            let requested = token.is_cancelled() || cancelled.as_mut().poll(cx).is_ready();
            if requested && self.interruptible() {
                return Poll::Ready(Err(Error::Cancelled));
            }
            if let Poll::Ready(result) = timed.as_mut().poll(cx) {
                return Poll::Ready(result);
            }
            // The step may have closed its last section before suspending
            if requested && self.interruptible() {
                return Poll::Ready(Err(Error::Cancelled));
            }
            Poll::Pending
        })
        .await
    }

    fn interruptible(&self) -> bool {
        self.sections
            .as_ref()
            .is_none_or(|bridge| bridge.critical_depth() == 0)
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        if self.debug {
            debug!(ssm = %self.name, "{}", args);
        } else {
            trace!(ssm = %self.name, "{}", args);
        }
    }
}

impl<S: StepList> fmt::Debug for Ssm<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ssm")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("timeout", &self.timeout)
            .finish()
    }
}
