//! Erasing every stored print

use async_trait::async_trait;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::Result;
use tracing::info;

use super::Exchange;
use crate::command::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyStep {
    Empty,
}

impl StepList for EmptyStep {
    const STEPS: &'static [Self] = &[Self::Empty];
}

#[async_trait]
impl<'a> StepHandler<EmptyStep> for Exchange<'a> {
    async fn run_step(&mut self, _ssm: &Ssm<EmptyStep>, _step: EmptyStep) -> Result<Transition<EmptyStep>> {
        self.checked(Command::Empty, &[]).await?;
        info!("Template storage erased");
        Ok(Transition::Complete)
    }
}

pub(crate) async fn run(mut ex: Exchange<'_>) -> Result<()> {
    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;

    Ssm::<EmptyStep>::new("empty")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut ex)
        .await
}
