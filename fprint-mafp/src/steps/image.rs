//! Finger polling
//!
//! The module has no finger interrupt on every transport, so presence is
//! polled with GET_IMAGE. "No finger" is a normal answer that re-arms the
//! poll; image errors are counted and only fail the machine once they
//! happen too often in a row.

use async_trait::async_trait;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::{Error, FingerStatus, Result};
use tracing::debug;

use super::Exchange;
use crate::command::Command;
use crate::constants::result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStep {
    /// Wait until the previous finger is lifted
    WaitUp,
    /// Wait for a finger and take its image
    WaitDown,
}

impl StepList for ImageStep {
    const STEPS: &'static [Self] = &[Self::WaitUp, Self::WaitDown];
}

/// Image child machine; starts with the lift-off wait if asked to
pub(crate) fn machine<S: StepList>(parent: &Ssm<S>, lift_first: bool) -> Ssm<ImageStep> {
    let child = parent.child::<ImageStep>("image");
    if lift_first {
        child
    } else {
        child.starting_at(ImageStep::WaitDown)
    }
}

#[async_trait]
impl<'a> StepHandler<ImageStep> for Exchange<'a> {
    async fn run_step(&mut self, _ssm: &Ssm<ImageStep>, step: ImageStep) -> Result<Transition<ImageStep>> {
        let poll = self.config.poll_interval;

        match step {
            ImageStep::WaitUp => {
                let answer = self.command(Command::GetImage, &[]).await?;
                match answer.result {
                    result::NO_FINGER => {
                        self.ctx.report_finger_status(FingerStatus::NEEDED);
                        Ok(Transition::Next)
                    }
                    result::SUCCESS | result::IMAGE_ERROR => {
                        self.ctx.report_finger_status(FingerStatus::PRESENT);
                        Ok(Transition::JumpDelayed(ImageStep::WaitUp, poll))
                    }
                    _ => Err(answer.failure().into()),
                }
            }
            ImageStep::WaitDown => {
                self.ctx.report_finger_status(FingerStatus::NEEDED);

                let answer = self.command(Command::GetImage, &[]).await?;
                match answer.result {
                    result::SUCCESS => {
                        self.image_errors = 0;
                        self.ctx.report_finger_status(FingerStatus::PRESENT);
                        Ok(Transition::Complete)
                    }
                    result::NO_FINGER => Ok(Transition::JumpDelayed(ImageStep::WaitDown, poll)),
                    result::IMAGE_ERROR => {
                        self.image_errors += 1;
                        debug!(errors = self.image_errors, "Image error while polling");
                        if self.image_errors >= self.config.image_error_threshold {
                            self.image_errors = 0;
                            return Err(Error::general("sensor keeps failing to take an image"));
                        }
                        Ok(Transition::JumpDelayed(ImageStep::WaitDown, poll))
                    }
                    _ => Err(answer.failure().into()),
                }
            }
        }
    }
}
