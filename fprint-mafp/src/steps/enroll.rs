//! Enrollment
//!
//! ```text
//! PwrBtnShield ─► CheckEmpty ─► TemplateTable ─► ReadTemplate
//!                                                    │
//!      ┌─────────────────────────────────────────────┘
//!      ▼
//! GetImage ─► GenerateFeature ─► DuplicateArea ─► Search ─► Progress ──┐
//!    ▲             │ retry            │ retry                          │
//!    └─────────────┴──────────────────┴──────── more stages ◄──────────┘
//!                                                                      │
//! MergeTemplate ◄──────────────────────────────────────────────────────┘
//!      ▼
//! SaveTemplateInfo ─► SaveTemplate ─► done
//!                          │ failed
//!                          ▼
//!               DeleteTemplateInfoIfFailed ─► error
//! ```
//!
//! When a stored print is updated, every sample that goes through the
//! duplicate search is also matched against the print's own slot
//! (`MatchSlot`, between `Search` and `Progress`); another finger fails the
//! enrollment before anything is written.

use async_trait::async_trait;
use chrono::Local;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::{Error, Print, Result, RetryKind};
use tracing::{debug, info, warn};

use super::{image, Exchange};
use crate::command::Command;
use crate::config::{DuplicateArea, DuplicateCheck};
use crate::constants::{result, DRIVER_ID};
use crate::response::TemplateTable;
use crate::template::{TemplateRecord, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollStep {
    PwrBtnShield,
    CheckEmpty,
    TemplateTable,
    ReadTemplate,
    GetImage,
    GenerateFeature,
    DuplicateArea,
    Search,
    MatchSlot,
    Progress,
    MergeTemplate,
    SaveTemplateInfo,
    SaveTemplate,
    DeleteTemplateInfoIfFailed,
}

impl StepList for EnrollStep {
    const STEPS: &'static [Self] = &[
        Self::PwrBtnShield,
        Self::CheckEmpty,
        Self::TemplateTable,
        Self::ReadTemplate,
        Self::GetImage,
        Self::GenerateFeature,
        Self::DuplicateArea,
        Self::Search,
        Self::MatchSlot,
        Self::Progress,
        Self::MergeTemplate,
        Self::SaveTemplateInfo,
        Self::SaveTemplate,
        Self::DeleteTemplateInfoIfFailed,
    ];
}

/// Fixed inputs of one enrollment
pub(crate) struct EnrollRequest<'p> {
    pub template: &'p Print,
    pub serial: &'p str,
    pub max_id: u16,
}

struct Enroller<'a, 'p> {
    ex: Exchange<'a>,
    req: EnrollRequest<'p>,
    stages: u32,
    stage: u32,
    /// Record of the print being replaced
    update: Option<TemplateRecord>,
    table: TemplateTable,
    slot: u16,
    need_lift: bool,
    searched: bool,
    shield_raised: bool,
    info_written: bool,
    failure: Option<Error>,
    record: Option<TemplateRecord>,
}

impl<'a, 'p> Enroller<'a, 'p> {
    /// Feature buffer of the current stage
    ///
    /// Stages are capped at `MAX_ENROLL_SAMPLES`, so every stage has its own.
    fn buffer(&self) -> u8 {
        u8::try_from(self.stage + 1).unwrap_or(u8::MAX)
    }

    /// Report a retry and go back to waiting for the finger
    fn retry(&mut self, kind: RetryKind) -> Transition<EnrollStep> {
        let error = Error::Retry(kind);
        self.ex
            .ctx
            .enroll_progress(self.stage, Some(self.req.template), Some(&error));
        Transition::Jump(EnrollStep::GetImage)
    }

    fn uid(&self) -> Uid {
        let template = self.req.template;
        Uid::new(
            template
                .enroll_date()
                .unwrap_or_else(|| Local::now().date_naive()),
            template.finger(),
            template.username().unwrap_or_default(),
        )
    }

    async fn search(&mut self) -> Result<()> {
        let max_id = self.req.max_id;
        let mut params = vec![self.buffer()];
        params.extend_from_slice(&0u16.to_be_bytes());
        params.extend_from_slice(&max_id.to_be_bytes());

        let answer = self.ex.command(Command::Search, &params).await?;
        match answer.result {
            result::SUCCESS => {}
            result::NO_MATCH | result::NOT_FOUND => return Ok(()),
            _ => return Err(answer.failure().into()),
        }

        let hit = answer.search_hit()?;
        if self.update.is_some() && hit.id == self.slot {
            debug!(id = hit.id, "Finger matches the print being updated");
            return Ok(());
        }

        if !self.ex.config.duplicate_delete {
            info!(id = hit.id, score = hit.score, "Finger already enrolled");
            return Err(Error::DataDuplicate);
        }

        warn!(id = hit.id, "Deleting duplicate template");
        self.ex.clear_template_info(hit.id).await?;
        self.ex.delete_template(hit.id).await?;
        self.table.set(hit.id, false);
        Ok(())
    }

    /// The current sample has to match the print being updated
    async fn match_slot(&mut self) -> Result<()> {
        let mut params = vec![self.buffer()];
        params.extend_from_slice(&self.slot.to_be_bytes());

        let answer = self.ex.command(Command::MatchWithFid, &params).await?;
        match answer.result {
            result::SUCCESS => Ok(()),
            result::NO_MATCH => {
                info!(slot = self.slot, "Finger does not match the print being updated");
                Err(Error::data_invalid("finger does not match the print being updated"))
            }
            result::NOT_FOUND => Err(Error::DataNotFound),
            _ => Err(answer.failure().into()),
        }
    }
}

#[async_trait]
impl<'a, 'p> StepHandler<EnrollStep> for Enroller<'a, 'p> {
    async fn run_step(&mut self, ssm: &Ssm<EnrollStep>, step: EnrollStep) -> Result<Transition<EnrollStep>> {
        match step {
            EnrollStep::PwrBtnShield => {
                if let Some(shield) = &self.ex.config.shield {
                    shield.raise();
                    self.shield_raised = true;
                }
                Ok(Transition::Next)
            }

            EnrollStep::CheckEmpty => {
                let answer = self.ex.checked(Command::GetTemplateNum, &[]).await?;
                let used = answer.u16_value()?;
                debug!(used, max = self.req.max_id, "Template count");

                if self.update.is_none() && used >= self.req.max_id {
                    return Err(Error::DataFull);
                }
                Ok(Transition::Next)
            }

            EnrollStep::TemplateTable => {
                self.table = self.ex.template_table().await?;

                if let Some(record) = &self.update {
                    if !self.table.is_used(record.id) {
                        return Err(Error::DataNotFound);
                    }
                    self.slot = record.id;
                } else {
                    self.slot = self
                        .table
                        .first_free(self.req.max_id)
                        .ok_or(Error::DataFull)?;
                }
                debug!(slot = self.slot, update = self.update.is_some(), "Slot chosen");
                Ok(Transition::Next)
            }

            EnrollStep::ReadTemplate => {
                if self.update.is_some() {
                    let answer = self
                        .ex
                        .command(Command::ReadTemplate, &self.slot.to_be_bytes())
                        .await?;
                    match answer.result {
                        result::SUCCESS => {}
                        result::NOT_FOUND => return Err(Error::DataNotFound),
                        _ => return Err(answer.failure().into()),
                    }
                }
                Ok(Transition::Next)
            }

            EnrollStep::GetImage => {
                image::machine(ssm, self.need_lift).run(&mut self.ex).await?;
                self.need_lift = true;
                Ok(Transition::Next)
            }

            EnrollStep::GenerateFeature => match self.ex.generate_feature(self.buffer()).await {
                Ok(()) => Ok(Transition::Next),
                Err(Error::Retry(kind)) => Ok(self.retry(kind)),
                Err(e) => Err(e),
            },

            EnrollStep::DuplicateArea => {
                if self.stage == 0 || self.ex.config.duplicate_area == DuplicateArea::Allow {
                    return Ok(Transition::Next);
                }

                let answer = self.ex.command(Command::DupAreaTest, &[self.buffer()]).await?;
                if answer.is_success() {
                    Ok(Transition::Next)
                } else {
                    debug!(code = answer.result, "Sample covers an area already seen");
                    Ok(self.retry(RetryKind::RemoveFinger))
                }
            }

            EnrollStep::Search => {
                let wanted = match self.ex.config.duplicate_check {
                    DuplicateCheck::Disabled => false,
                    DuplicateCheck::Enabled => true,
                    DuplicateCheck::Once => !self.searched,
                };
                if !wanted {
                    return Ok(Transition::Jump(EnrollStep::Progress));
                }

                self.search().await?;
                self.searched = true;
                if self.update.is_some() {
                    Ok(Transition::Next)
                } else {
                    Ok(Transition::Jump(EnrollStep::Progress))
                }
            }

            EnrollStep::MatchSlot => {
                self.match_slot().await?;
                Ok(Transition::Next)
            }

            EnrollStep::Progress => {
                self.stage += 1;
                self.ex
                    .ctx
                    .enroll_progress(self.stage, Some(self.req.template), None);

                if self.stage < self.stages {
                    Ok(Transition::Jump(EnrollStep::GetImage))
                } else {
                    Ok(Transition::Next)
                }
            }

            EnrollStep::MergeTemplate => {
                self.ex.checked(Command::GenTemplate, &[]).await?;
                Ok(Transition::Next)
            }

            EnrollStep::SaveTemplateInfo => {
                let record = TemplateRecord::new(self.req.serial, self.slot, &self.uid());
                self.info_written = true;
                self.ex.save_template_info(self.slot, &record.encode()).await?;
                self.record = Some(record);
                Ok(Transition::Next)
            }

            EnrollStep::SaveTemplate => {
                match self
                    .ex
                    .checked(Command::SaveTemplate, &self.slot.to_be_bytes())
                    .await
                {
                    Ok(_) => {
                        self.info_written = false;
                        Ok(Transition::Complete)
                    }
                    Err(e) => {
                        self.failure = Some(e);
                        Ok(Transition::Next)
                    }
                }
            }

            EnrollStep::DeleteTemplateInfoIfFailed => {
                self.rollback().await;
                Err(self
                    .failure
                    .take()
                    .unwrap_or_else(|| Error::general("template was not saved")))
            }
        }
    }
}

impl Enroller<'_, '_> {
    async fn rollback(&mut self) {
        if !self.info_written {
            return;
        }
        self.info_written = false;

        if let Err(e) = self.ex.clear_template_info(self.slot).await {
            warn!(slot = self.slot, error = %e, "Could not roll back template info");
        }
    }
}

pub(crate) async fn run(ex: Exchange<'_>, req: EnrollRequest<'_>) -> Result<Print> {
    let update = if req.template.is_template() {
        None
    } else {
        Some(TemplateRecord::from_print(req.template).map_err(|e| Error::data_invalid(e.to_string()))?)
    };

    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;
    let stages = ex.config.enroll_stages();
    let mut enroller = Enroller {
        ex,
        req,
        stages,
        stage: 0,
        update,
        table: TemplateTable::new(),
        slot: 0,
        need_lift: false,
        searched: false,
        shield_raised: false,
        info_written: false,
        failure: None,
        record: None,
    };

    let outcome = Ssm::<EnrollStep>::new("enroll")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut enroller)
        .await;

    if outcome.is_err() {
        enroller.rollback().await;
    }
    if enroller.shield_raised {
        if let Some(shield) = &enroller.ex.config.shield {
            shield.lower();
        }
    }
    outcome?;

    let record = enroller
        .record
        .take()
        .ok_or_else(|| Error::general("enrollment finished without a record"))?;
    info!(slot = record.id, "Enrolled {:?}", record);

    let mut print = record.to_print(DRIVER_ID);
    if let Some(description) = enroller.req.template.description() {
        print.set_description(Some(description.to_string()));
    }
    Ok(print)
}
