//! Listing stored prints

use async_trait::async_trait;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::{Print, Result};
use tracing::debug;

use super::Exchange;
use crate::constants::record::UID_SIZE;
use crate::constants::DRIVER_ID;
use crate::template::TemplateRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStep {
    TemplateTable,
    TemplateInfo,
}

impl StepList for ListStep {
    const STEPS: &'static [Self] = &[Self::TemplateTable, Self::TemplateInfo];
}

struct Lister<'a, 'p> {
    ex: Exchange<'a>,
    serial: &'p str,
    ids: Vec<u16>,
    next: usize,
    prints: Vec<Print>,
}

#[async_trait]
impl<'a, 'p> StepHandler<ListStep> for Lister<'a, 'p> {
    async fn run_step(&mut self, _ssm: &Ssm<ListStep>, step: ListStep) -> Result<Transition<ListStep>> {
        match step {
            ListStep::TemplateTable => {
                self.ids = self.ex.template_table().await?.ids();
                debug!(count = self.ids.len(), "Stored templates");
                Ok(Transition::Next)
            }
            ListStep::TemplateInfo => {
                let Some(&id) = self.ids.get(self.next) else {
                    return Ok(Transition::Complete);
                };
                self.next += 1;

                // Templates without a record are still listed so they can be deleted
                let record = match self.ex.template_info(id).await? {
                    Some(record) => record,
                    None => TemplateRecord {
                        serial: self.serial.to_string(),
                        id,
                        uid: [0u8; UID_SIZE],
                    },
                };
                self.prints.push(record.to_print(DRIVER_ID));
                Ok(Transition::Jump(ListStep::TemplateInfo))
            }
        }
    }
}

pub(crate) async fn run(ex: Exchange<'_>, serial: &str) -> Result<Vec<Print>> {
    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;
    let mut lister = Lister {
        ex,
        serial,
        ids: Vec::new(),
        next: 0,
        prints: Vec::new(),
    };

    Ssm::<ListStep>::new("list")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut lister)
        .await?;

    Ok(lister.prints)
}
