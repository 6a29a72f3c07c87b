//! Module initialisation after open

use async_trait::async_trait;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::{Error, Result};
use tracing::{debug, info};

use super::Exchange;
use crate::command::Command;
use crate::constants::HANDSHAKE_CODE;
use crate::response::SensorInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Drop whatever a previous session left queued
    Drain,
    Handshake,
    ModuleStatus,
    MaxId,
}

impl StepList for InitStep {
    const STEPS: &'static [Self] = &[Self::Drain, Self::Handshake, Self::ModuleStatus, Self::MaxId];
}

/// What the module told us while initialising
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub sensor: SensorInfo,
    /// Number of template slots
    pub max_id: u16,
}

struct Init<'a> {
    ex: Exchange<'a>,
    info: ModuleInfo,
}

#[async_trait]
impl<'a> StepHandler<InitStep> for Init<'a> {
    async fn run_step(&mut self, _ssm: &Ssm<InitStep>, step: InitStep) -> Result<Transition<InitStep>> {
        match step {
            InitStep::Drain => {
                let dropped = self.ex.link.drain().await?;
                debug!(dropped, "Input drained");
            }
            InitStep::Handshake => {
                let answer = self.ex.checked(Command::Handshake, &HANDSHAKE_CODE).await?;
                self.info.sensor = answer.sensor_info()?;
            }
            InitStep::ModuleStatus => {
                let answer = self.ex.checked(Command::GetInitStatus, &[]).await?;
                match answer.data.first() {
                    Some(0) => {}
                    Some(status) => {
                        return Err(Error::general(format!("module init status 0x{status:02X}")))
                    }
                    None => return Err(Error::protocol("init status answer without status")),
                }
            }
            InitStep::MaxId => {
                self.info.max_id = self.ex.max_id().await?;
            }
        }
        Ok(Transition::Next)
    }
}

pub(crate) async fn run(ex: Exchange<'_>) -> Result<ModuleInfo> {
    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;
    let mut init = Init {
        ex,
        info: ModuleInfo::default(),
    };

    Ssm::<InitStep>::new("init")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut init)
        .await?;

    info!("Sensor ready: {}, {} slots", init.info.sensor, init.info.max_id);
    Ok(init.info)
}
