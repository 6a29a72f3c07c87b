//! Action payloads and result checks

use fprint_core::{Action, ActionContext, Driver, ProbeInfo};
use fprint_types::{Error, Image, Print, Result};
use tracing::warn;

/// Outcome of a verify or identify run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// The enrolled print that matched, if any
    pub matched: Option<Print>,
    /// Print built from the scan, when the driver provides one
    pub scanned: Option<Print>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// One action with the private copy of its caller input
#[derive(Debug, Clone)]
pub(crate) enum Job {
    Probe,
    Open,
    Close,
    Enroll { template: Print },
    Verify { print: Print },
    Identify { gallery: Vec<Print> },
    Capture { wait_for_finger: bool },
    Delete { print: Print },
    List,
    ClearStorage,
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Done,
    Probed(ProbeInfo),
    Enrolled(Print),
    Matched(MatchResult),
    Captured(Image),
    Listed(Vec<Print>),
}

fn missing(action: Action) -> Error {
    Error::not_supported(format!("driver lost its {action} capability"))
}

fn unexpected(action: Action) -> Error {
    Error::general(format!("{action} finished with a mismatched result"))
}

impl Job {
    pub fn action(&self) -> Action {
        match self {
            Job::Probe => Action::Probe,
            Job::Open => Action::Open,
            Job::Close => Action::Close,
            Job::Enroll { .. } => Action::Enroll,
            Job::Verify { .. } => Action::Verify,
            Job::Identify { .. } => Action::Identify,
            Job::Capture { .. } => Action::Capture,
            Job::Delete { .. } => Action::Delete,
            Job::List => Action::List,
            Job::ClearStorage => Action::ClearStorage,
        }
    }

    /// Dispatch to the driver capability behind this action
    pub async fn run(&self, driver: &mut dyn Driver, ctx: &ActionContext) -> Result<Outcome> {
        let action = self.action();
        match self {
            Job::Probe => driver.probe(ctx).await.map(Outcome::Probed),
            Job::Open => driver.open(ctx).await.map(|()| Outcome::Done),
            Job::Close => driver.close(ctx).await.map(|()| Outcome::Done),
            Job::Enroll { template } => {
                let enroller = driver.enroller().ok_or_else(|| missing(action))?;
                enroller
                    .enroll(ctx, template.clone())
                    .await
                    .map(Outcome::Enrolled)
            }
            Job::Verify { print } => {
                let verifier = driver.verifier().ok_or_else(|| missing(action))?;
                verifier.verify(ctx, print).await.map(|()| Outcome::Done)
            }
            Job::Identify { gallery } => {
                let identifier = driver.identifier().ok_or_else(|| missing(action))?;
                identifier
                    .identify(ctx, gallery)
                    .await
                    .map(|()| Outcome::Done)
            }
            Job::Capture { wait_for_finger } => {
                let capturer = driver.capturer().ok_or_else(|| missing(action))?;
                capturer
                    .capture(ctx, *wait_for_finger)
                    .await
                    .map(Outcome::Captured)
            }
            Job::Delete { print } => {
                let storage = driver.storage().ok_or_else(|| missing(action))?;
                storage.delete(ctx, print).await.map(|()| Outcome::Done)
            }
            Job::List => {
                let storage = driver.storage().ok_or_else(|| missing(action))?;
                storage.list(ctx).await.map(Outcome::Listed)
            }
            Job::ClearStorage => {
                let storage = driver.storage().ok_or_else(|| missing(action))?;
                storage.clear(ctx).await.map(|()| Outcome::Done)
            }
        }
    }

    /// Validate what the driver produced and stamp the session identity
    pub fn check(
        &self,
        result: Result<Outcome>,
        ctx: &ActionContext,
        driver_id: &str,
        device_id: &str,
    ) -> Result<Outcome> {
        match self {
            Job::Enroll { .. } => {
                let Outcome::Enrolled(mut print) = result? else {
                    return Err(unexpected(self.action()));
                };
                if print.is_template() {
                    return Err(Error::general("driver returned a print without template data"));
                }
                print.bind(driver_id, device_id);
                Ok(Outcome::Enrolled(print))
            }
            Job::Verify { .. } => {
                check_match(result, ctx, None, driver_id, device_id).map(Outcome::Matched)
            }
            Job::Identify { gallery } => {
                check_match(result, ctx, Some(gallery.as_slice()), driver_id, device_id)
                    .map(Outcome::Matched)
            }
            Job::List => {
                let Outcome::Listed(mut prints) = result? else {
                    return Err(unexpected(self.action()));
                };
                for print in &mut prints {
                    print.bind(driver_id, device_id);
                }
                Ok(Outcome::Listed(prints))
            }
            _ => result,
        }
    }
}

fn check_match(
    result: Result<Outcome>,
    ctx: &ActionContext,
    gallery: Option<&[Print]>,
    driver_id: &str,
    device_id: &str,
) -> Result<MatchResult> {
    let report = ctx.match_report();

    if let Err(e) = result {
        if e.is_retry() && !report.reported {
            ctx.report_match_error(e.clone());
        }
        return Err(e);
    }

    if !report.reported {
        warn!(action = %ctx.action(), "Driver finished without reporting a match result");
        return Err(Error::general("driver did not report a match result"));
    }
    if let Some(e) = report.error {
        return Err(e);
    }

    if let (Some(gallery), Some(matched)) = (gallery, report.matched.as_ref()) {
        if !gallery.contains(matched) {
            return Err(Error::general("matched print is not part of the gallery"));
        }
    }

    let mut scanned = report.scanned;
    if let Some(print) = scanned.as_mut() {
        print.bind(driver_id, device_id);
    }

    Ok(MatchResult {
        matched: report.matched,
        scanned,
    })
}

impl Outcome {
    pub fn into_unit(self) -> Result<()> {
        match self {
            Outcome::Done => Ok(()),
            _ => Err(Error::general("action finished with a mismatched result")),
        }
    }

    pub fn into_probe(self) -> Result<ProbeInfo> {
        match self {
            Outcome::Probed(info) => Ok(info),
            _ => Err(unexpected(Action::Probe)),
        }
    }

    pub fn into_print(self) -> Result<Print> {
        match self {
            Outcome::Enrolled(print) => Ok(print),
            _ => Err(unexpected(Action::Enroll)),
        }
    }

    pub fn into_match(self) -> Result<MatchResult> {
        match self {
            Outcome::Matched(result) => Ok(result),
            _ => Err(Error::general("match finished with a mismatched result")),
        }
    }

    pub fn into_image(self) -> Result<Image> {
        match self {
            Outcome::Captured(image) => Ok(image),
            _ => Err(unexpected(Action::Capture)),
        }
    }

    pub fn into_prints(self) -> Result<Vec<Print>> {
        match self {
            Outcome::Listed(prints) => Ok(prints),
            _ => Err(unexpected(Action::List)),
        }
    }
}
