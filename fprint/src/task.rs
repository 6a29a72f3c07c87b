//! Completion handles

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use fprint_types::{Error, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle to one started action
///
/// Resolves exactly once. Refused actions come back as handles that are
/// already resolved, so callers treat both paths alike.
#[must_use = "an action's result is only observable through its task"]
pub struct Task<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Task<T> {
    pub(crate) fn pending() -> (Self, oneshot::Sender<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, tx)
    }

    pub(crate) fn ready(result: Result<T>) -> Self {
        let (task, tx) = Self::pending();
        let _ = tx.send(result);
        task
    }

    /// Wait for the result
    pub async fn finish(self) -> Result<T> {
        self.await
    }

    /// Run `f` with the result once the action is done
    pub fn on_done<F>(self, f: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        tokio::spawn(async move { f(self.await) })
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::general(
                "action was dropped before it completed",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
