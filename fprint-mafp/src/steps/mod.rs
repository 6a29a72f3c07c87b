//! Step machines of the driver operations
//!
//! Every operation is an [`Ssm`](fprint_core::Ssm) over its own step enum.
//! The machines share an [`Exchange`]: the link, the configuration and the
//! action context. Each command exchange runs inside a critical section, so
//! cancellation only lands between two exchanges.

pub mod delete;
pub mod empty;
pub mod enroll;
pub mod image;
pub mod init;
pub mod list;
pub mod matching;

use bytes::Bytes;
use fprint_core::ActionContext;
use fprint_types::{Error, Result, RetryKind};
use tracing::{trace, warn};

use crate::command::Command;
use crate::config::MafpConfig;
use crate::constants::record::RECORD_SIZE;
use crate::constants::result;
use crate::link::Link;
use crate::response::{Answer, TemplateTable};
use crate::template::TemplateRecord;

/// Buffer the module extracts features of the current image into
pub(crate) const SEARCH_BUFFER: u8 = 1;

/// What a step machine works with
pub(crate) struct Exchange<'a> {
    pub link: &'a mut Link,
    pub config: &'a MafpConfig,
    pub ctx: &'a ActionContext,
    /// Consecutive image errors while waiting for a finger
    pub image_errors: u32,
}

impl<'a> Exchange<'a> {
    pub fn new(link: &'a mut Link, config: &'a MafpConfig, ctx: &'a ActionContext) -> Self {
        Self {
            link,
            config,
            ctx,
            image_errors: 0,
        }
    }

    /// One command with its answer, result code unchecked
    pub async fn command(&mut self, command: Command, params: &[u8]) -> Result<Answer> {
        let _critical = self.ctx.critical_section();
        let answer = self
            .link
            .command(command, params, self.config.cmd_timeout)
            .await?;
        Ok(answer)
    }

    /// One command that has to succeed
    pub async fn checked(&mut self, command: Command, params: &[u8]) -> Result<Answer> {
        let answer = self.command(command, params).await?;
        Ok(answer.check()?)
    }

    /// A command whose answer carries a data transfer
    pub async fn command_with_data(
        &mut self,
        command: Command,
        params: &[u8],
    ) -> Result<(Answer, Bytes)> {
        let _critical = self.ctx.critical_section();
        let answer = self
            .link
            .command_with_data(command, params, self.config.cmd_timeout, self.config.data_timeout)
            .await?;
        Ok(answer)
    }

    pub async fn max_id(&mut self) -> Result<u16> {
        let answer = self.checked(Command::GetMaxId, &[]).await?;
        Ok(answer.u16_value()?)
    }

    /// Slot occupancy; an oversize answer means the storage is full
    pub async fn template_table(&mut self) -> Result<TemplateTable> {
        let (answer, data) = self
            .command_with_data(Command::GetTemplateTable, &[])
            .await?;

        match answer.result {
            result::SUCCESS => Ok(TemplateTable::decode(&data)?),
            result::TPL_NUM_OVERSIZE => Err(Error::DataFull),
            _ => Err(answer.failure().into()),
        }
    }

    /// Record stored next to a slot; `None` if the slot has none
    pub async fn template_info(&mut self, id: u16) -> Result<Option<TemplateRecord>> {
        let (answer, data) = self
            .command_with_data(Command::GetTemplateInfo, &id.to_be_bytes())
            .await?;

        match answer.result {
            result::SUCCESS => {}
            result::NOT_FOUND => return Ok(None),
            _ => return Err(answer.failure().into()),
        }

        if data.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        Ok(Some(TemplateRecord::decode(&data)?))
    }

    /// Write the record of a slot; a zeroed record clears it
    pub async fn save_template_info(&mut self, id: u16, record: &[u8; RECORD_SIZE]) -> Result<()> {
        let _critical = self.ctx.critical_section();
        self.link
            .command(Command::SaveTemplateInfo, &id.to_be_bytes(), self.config.cmd_timeout)
            .await?
            .check()?;

        self.link
            .send_data(Command::SaveTemplateInfo, record, self.config.data_timeout)
            .await?
            .check()?;

        trace!(id, "Template info written");
        Ok(())
    }

    pub async fn clear_template_info(&mut self, id: u16) -> Result<()> {
        self.save_template_info(id, &[0u8; RECORD_SIZE]).await
    }

    pub async fn delete_template(&mut self, id: u16) -> Result<()> {
        let mut params = [0u8; 4];
        params[..2].copy_from_slice(&id.to_be_bytes());
        params[2..].copy_from_slice(&1u16.to_be_bytes());
        self.checked(Command::DeleteTemplate, &params).await?;
        Ok(())
    }

    /// Extract features of the current image into `buffer`
    ///
    /// Poor quality is a retry condition, not a failure.
    pub async fn generate_feature(&mut self, buffer: u8) -> Result<()> {
        let answer = self.command(Command::GenFeature, &[buffer]).await?;
        match answer.result {
            result::SUCCESS => Ok(()),
            result::FEATURE_MESSY | result::FEATURE_FEW => {
                Err(Error::Retry(RetryKind::General))
            }
            _ => Err(answer.failure().into()),
        }
    }

    /// Best effort; failures are only logged
    pub async fn abort(&mut self) {
        let timeout = self.config.ctrl_timeout;
        if let Err(e) = self.link.command(Command::Cancel, &[], timeout).await {
            warn!(error = %e, "Module did not take the cancel command");
        }
    }
}
