//! Blocking variants of the device actions
//!
//! Each call spins up a private current-thread runtime and drives it until
//! the action resolves. Calling them from async code is refused.

use fprint_core::{EnrollProgressFn, MatchFn, ProbeInfo};
use fprint_types::{Error, Image, Print, Result};
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::job::MatchResult;
use crate::task::Task;

fn block_on<T>(start: impl FnOnce() -> Task<T>) -> Result<T> {
    if Handle::try_current().is_ok() {
        return Err(Error::general(
            "blocking device calls cannot be made from async code",
        ));
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::general(format!("failed to start a runtime: {e}")))?;
    runtime.block_on(async move { start().await })
}

impl Device {
    pub fn probe_sync(&self, cancel: &CancellationToken) -> Result<ProbeInfo> {
        block_on(|| self.probe(cancel))
    }

    pub fn open_sync(&self, cancel: &CancellationToken) -> Result<()> {
        block_on(|| self.open(cancel))
    }

    pub fn close_sync(&self, cancel: &CancellationToken) -> Result<()> {
        block_on(|| self.close(cancel))
    }

    pub fn enroll_sync(
        &self,
        template: Print,
        cancel: &CancellationToken,
        progress: Option<EnrollProgressFn>,
    ) -> Result<Print> {
        block_on(|| self.enroll(template, cancel, progress))
    }

    pub fn verify_sync(
        &self,
        print: &Print,
        cancel: &CancellationToken,
        on_match: Option<MatchFn>,
    ) -> Result<MatchResult> {
        block_on(|| self.verify(print, cancel, on_match))
    }

    pub fn identify_sync(
        &self,
        gallery: &[Print],
        cancel: &CancellationToken,
        on_match: Option<MatchFn>,
    ) -> Result<MatchResult> {
        block_on(|| self.identify(gallery, cancel, on_match))
    }

    pub fn capture_sync(&self, wait_for_finger: bool, cancel: &CancellationToken) -> Result<Image> {
        block_on(|| self.capture(wait_for_finger, cancel))
    }

    pub fn delete_print_sync(&self, print: &Print, cancel: &CancellationToken) -> Result<()> {
        block_on(|| self.delete_print(print, cancel))
    }

    pub fn list_prints_sync(&self, cancel: &CancellationToken) -> Result<Vec<Print>> {
        block_on(|| self.list_prints(cancel))
    }

    pub fn clear_storage_sync(&self, cancel: &CancellationToken) -> Result<()> {
        block_on(|| self.clear_storage(cancel))
    }

    pub fn suspend_sync(&self) -> Result<()> {
        block_on(|| self.suspend())
    }

    pub fn resume_sync(&self) -> Result<()> {
        block_on(|| self.resume())
    }
}
