//! Deleting one stored print

use async_trait::async_trait;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::{Error, Print, Result};
use tracing::{debug, info};

use super::Exchange;
use crate::template::TemplateRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    TemplateTable,
    TemplateInfo,
    ClearTemplateInfo,
    DeleteTemplate,
}

impl StepList for DeleteStep {
    const STEPS: &'static [Self] = &[
        Self::TemplateTable,
        Self::TemplateInfo,
        Self::ClearTemplateInfo,
        Self::DeleteTemplate,
    ];
}

struct Deleter<'a> {
    ex: Exchange<'a>,
    record: TemplateRecord,
}

#[async_trait]
impl<'a> StepHandler<DeleteStep> for Deleter<'a> {
    async fn run_step(&mut self, _ssm: &Ssm<DeleteStep>, step: DeleteStep) -> Result<Transition<DeleteStep>> {
        let id = self.record.id;
        match step {
            DeleteStep::TemplateTable => {
                if !self.ex.template_table().await?.is_used(id) {
                    return Err(Error::DataNotFound);
                }
            }
            DeleteStep::TemplateInfo => {
                // A record that says otherwise belongs to another print
                if let Some(stored) = self.ex.template_info(id).await? {
                    if stored.uid != self.record.uid {
                        debug!(id, "Slot holds another print");
                        return Err(Error::DataNotFound);
                    }
                }
            }
            DeleteStep::ClearTemplateInfo => {
                self.ex.clear_template_info(id).await?;
            }
            DeleteStep::DeleteTemplate => {
                self.ex.delete_template(id).await?;
                info!(id, "Template deleted");
            }
        }
        Ok(Transition::Next)
    }
}

pub(crate) async fn run(ex: Exchange<'_>, print: &Print) -> Result<()> {
    let record = TemplateRecord::from_print(print).map_err(|e| Error::data_invalid(e.to_string()))?;

    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;
    let mut deleter = Deleter { ex, record };

    Ssm::<DeleteStep>::new("delete")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut deleter)
        .await
}
