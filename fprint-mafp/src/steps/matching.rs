//! Verify and identify
//!
//! Both take one image, extract its features and let the module do the
//! matching. A hit is confirmed by reading the slot's record back and
//! comparing uids, so a print enrolled elsewhere into the same slot never
//! matches.

use async_trait::async_trait;
use fprint_core::{Ssm, StepHandler, StepList, Transition};
use fprint_types::{Error, Print, Result};
use tracing::debug;

use super::{image, Exchange, SEARCH_BUFFER};
use crate::command::Command;
use crate::constants::{result, DRIVER_ID};
use crate::template::TemplateRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStep {
    PwrBtnShield,
    TemplateTable,
    GetImage,
    GenerateFeature,
    MatchTemplate,
    TemplateInfo,
}

impl StepList for VerifyStep {
    const STEPS: &'static [Self] = &[
        Self::PwrBtnShield,
        Self::TemplateTable,
        Self::GetImage,
        Self::GenerateFeature,
        Self::MatchTemplate,
        Self::TemplateInfo,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyStep {
    PwrBtnShield,
    GetImage,
    GenerateFeature,
    Search,
    TemplateInfo,
}

impl StepList for IdentifyStep {
    const STEPS: &'static [Self] = &[
        Self::PwrBtnShield,
        Self::GetImage,
        Self::GenerateFeature,
        Self::Search,
        Self::TemplateInfo,
    ];
}

fn raise_shield(ex: &Exchange<'_>) -> bool {
    match &ex.config.shield {
        Some(shield) => {
            shield.raise();
            true
        }
        None => false,
    }
}

fn lower_shield(ex: &Exchange<'_>, raised: bool) {
    if raised {
        if let Some(shield) = &ex.config.shield {
            shield.lower();
        }
    }
}

/// Read a slot's record back as the scanned print
async fn stored_print(ex: &mut Exchange<'_>, id: u16) -> Result<Option<(TemplateRecord, Print)>> {
    Ok(ex
        .template_info(id)
        .await?
        .map(|record| {
            let print = record.to_print(DRIVER_ID);
            (record, print)
        }))
}

struct Verifier<'a, 'p> {
    ex: Exchange<'a>,
    print: &'p Print,
    record: TemplateRecord,
    shield_raised: bool,
}

#[async_trait]
impl<'a, 'p> StepHandler<VerifyStep> for Verifier<'a, 'p> {
    async fn run_step(&mut self, ssm: &Ssm<VerifyStep>, step: VerifyStep) -> Result<Transition<VerifyStep>> {
        match step {
            VerifyStep::PwrBtnShield => {
                self.shield_raised = raise_shield(&self.ex);
            }
            VerifyStep::TemplateTable => {
                let table = self.ex.template_table().await?;
                if !table.is_used(self.record.id) {
                    debug!(id = self.record.id, "Print is no longer stored");
                    return Err(Error::DataNotFound);
                }
            }
            VerifyStep::GetImage => {
                image::machine(ssm, false).run(&mut self.ex).await?;
            }
            VerifyStep::GenerateFeature => {
                self.ex.generate_feature(SEARCH_BUFFER).await?;
            }
            VerifyStep::MatchTemplate => {
                let mut params = vec![SEARCH_BUFFER];
                params.extend_from_slice(&self.record.id.to_be_bytes());

                let answer = self.ex.command(Command::MatchWithFid, &params).await?;
                match answer.result {
                    result::SUCCESS => {}
                    result::NO_MATCH | result::NOT_FOUND => {
                        self.ex.ctx.report_match(None, None);
                        return Ok(Transition::Complete);
                    }
                    _ => return Err(answer.failure().into()),
                }
            }
            VerifyStep::TemplateInfo => {
                let stored = stored_print(&mut self.ex, self.record.id).await?;
                match stored {
                    Some((record, scanned)) if record.uid == self.record.uid => {
                        self.ex.ctx.report_match(Some(self.print.clone()), Some(scanned));
                    }
                    Some((_, scanned)) => {
                        debug!(id = self.record.id, "Slot holds another print");
                        self.ex.ctx.report_match(None, Some(scanned));
                    }
                    None => self.ex.ctx.report_match(None, None),
                }
                return Ok(Transition::Complete);
            }
        }
        Ok(Transition::Next)
    }
}

pub(crate) async fn verify(ex: Exchange<'_>, print: &Print) -> Result<()> {
    let record = TemplateRecord::from_print(print).map_err(|e| Error::data_invalid(e.to_string()))?;

    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;
    let mut verifier = Verifier {
        ex,
        print,
        record,
        shield_raised: false,
    };

    let outcome = Ssm::<VerifyStep>::new("verify")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut verifier)
        .await;

    lower_shield(&verifier.ex, verifier.shield_raised);
    outcome
}

struct Identifier<'a, 'p> {
    ex: Exchange<'a>,
    gallery: &'p [Print],
    max_id: u16,
    hit: u16,
    shield_raised: bool,
}

#[async_trait]
impl<'a, 'p> StepHandler<IdentifyStep> for Identifier<'a, 'p> {
    async fn run_step(&mut self, ssm: &Ssm<IdentifyStep>, step: IdentifyStep) -> Result<Transition<IdentifyStep>> {
        match step {
            IdentifyStep::PwrBtnShield => {
                self.shield_raised = raise_shield(&self.ex);
            }
            IdentifyStep::GetImage => {
                image::machine(ssm, false).run(&mut self.ex).await?;
            }
            IdentifyStep::GenerateFeature => {
                self.ex.generate_feature(SEARCH_BUFFER).await?;
            }
            IdentifyStep::Search => {
                let mut params = vec![SEARCH_BUFFER];
                params.extend_from_slice(&0u16.to_be_bytes());
                params.extend_from_slice(&self.max_id.to_be_bytes());

                let answer = self.ex.command(Command::Search, &params).await?;
                match answer.result {
                    result::SUCCESS => self.hit = answer.search_hit()?.id,
                    result::NO_MATCH | result::NOT_FOUND => {
                        self.ex.ctx.report_match(None, None);
                        return Ok(Transition::Complete);
                    }
                    _ => return Err(answer.failure().into()),
                }
            }
            IdentifyStep::TemplateInfo => {
                let Some((stored, scanned)) = stored_print(&mut self.ex, self.hit).await? else {
                    self.ex.ctx.report_match(None, None);
                    return Ok(Transition::Complete);
                };

                let matched = self.gallery.iter().find(|print| {
                    TemplateRecord::from_print(print)
                        .is_ok_and(|record| record.id == stored.id && record.uid == stored.uid)
                });
                debug!(id = self.hit, in_gallery = matched.is_some(), "Module found a print");
                self.ex.ctx.report_match(matched.cloned(), Some(scanned));
                return Ok(Transition::Complete);
            }
        }
        Ok(Transition::Next)
    }
}

pub(crate) async fn identify(ex: Exchange<'_>, gallery: &[Print], max_id: u16) -> Result<()> {
    let bridge = ex.ctx.bridge().clone();
    let debug = ex.config.debug_ssm;
    let mut identifier = Identifier {
        ex,
        gallery,
        max_id,
        hit: 0,
        shield_raised: false,
    };

    let outcome = Ssm::<IdentifyStep>::new("identify")
        .with_bridge(&bridge)
        .with_debug(debug)
        .run(&mut identifier)
        .await;

    lower_shield(&identifier.ex, identifier.shield_raised);
    outcome
}
