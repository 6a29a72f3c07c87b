//! The MAFP driver
//!
//! Match-on-chip modules keep templates in their own flash and do all
//! matching themselves; the host only drives the exchanges and keeps a
//! small record (serial, slot id, uid) per template as print data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fprint_core::{
    Action, ActionContext, CancelHook, Driver, DriverDescriptor, Enroll, Identify, ProbeInfo,
    Storage, Verify,
};
use fprint_transport::Transport;
use fprint_types::{Error, Features, Print, Result, ScanType};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::MafpConfig;
use crate::constants::record::SERIAL_SIZE;
use crate::constants::{DRIVER_ID, DRIVER_NAME};
use crate::link::Link;
use crate::response::SensorInfo;
use crate::steps::{self, enroll::EnrollRequest, init::ModuleInfo, Exchange};

/// Remembers that the session cancelled the running action
#[derive(Debug, Default)]
struct MafpCancel {
    requested: AtomicBool,
}

impl CancelHook for MafpCancel {
    fn cancel(&self, action: Action) {
        debug!(%action, "Cancelling module operation");
        self.requested.store(true, Ordering::SeqCst);
    }
}

/// Driver for MAFP modules on any [`Transport`]
pub struct MafpDriver {
    descriptor: DriverDescriptor,
    link: Link,
    config: MafpConfig,
    serial: String,
    module: Option<ModuleInfo>,
    cancel: Arc<MafpCancel>,
}

impl MafpDriver {
    pub fn new(transport: Box<dyn Transport>, config: MafpConfig) -> Self {
        let descriptor = Self::describe(&config);
        let serial = serial_of(&transport.endpoint());
        let link = Link::new(transport)
            .with_address(config.address)
            .with_data_chunk(config.data_chunk);

        Self {
            descriptor,
            link,
            config,
            serial,
            module: None,
            cancel: Arc::new(MafpCancel::default()),
        }
    }

    /// Descriptor for a driver built with `config`
    pub fn describe(config: &MafpConfig) -> DriverDescriptor {
        DriverDescriptor::new(DRIVER_ID, DRIVER_NAME)
            .with_features(
                Features::VERIFY
                    | Features::IDENTIFY
                    | Features::STORAGE
                    | Features::STORAGE_LIST
                    | Features::STORAGE_DELETE
                    | Features::STORAGE_CLEAR
                    | Features::DUPLICATES_CHECK
                    | Features::UPDATE_PRINT,
            )
            .with_scan_type(ScanType::Press)
            .with_enroll_stages(config.enroll_stages())
    }

    pub fn config(&self) -> &MafpConfig {
        &self.config
    }

    /// Serial number written into template records
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Handshake information; `None` while closed
    pub fn sensor_info(&self) -> Option<&SensorInfo> {
        self.module.as_ref().map(|module| &module.sensor)
    }

    /// Number of template slots; `None` while closed
    pub fn max_id(&self) -> Option<u16> {
        self.module.as_ref().map(|module| module.max_id)
    }

    fn slots(&self) -> Result<u16> {
        self.max_id()
            .ok_or_else(|| Error::general("module was not initialised"))
    }

    fn exchange<'a>(&'a mut self, ctx: &'a ActionContext) -> Exchange<'a> {
        Exchange::new(&mut self.link, &self.config, ctx)
    }

    /// Stop the module's own operation after the session cancelled us
    async fn settle<T>(&mut self, ctx: &ActionContext, outcome: Result<T>) -> Result<T> {
        let requested = self.cancel.requested.swap(false, Ordering::SeqCst);
        if requested || matches!(outcome, Err(Error::Cancelled)) {
            self.exchange(ctx).abort().await;
        }
        outcome
    }
}

#[async_trait]
impl Driver for MafpDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    async fn probe(&mut self, _ctx: &ActionContext) -> Result<ProbeInfo> {
        Ok(ProbeInfo {
            device_id: Some(self.serial.clone()),
            name: None,
        })
    }

    async fn open(&mut self, ctx: &ActionContext) -> Result<()> {
        self.cancel.requested.store(false, Ordering::SeqCst);
        self.link.connect().await?;

        match steps::init::run(self.exchange(ctx)).await {
            Ok(module) => {
                info!("Opened {} at {}", DRIVER_NAME, self.link.endpoint());
                self.module = Some(module);
                Ok(())
            }
            Err(e) => {
                if let Err(close) = self.link.disconnect().await {
                    warn!(error = %close, "Could not release the link after a failed open");
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self, _ctx: &ActionContext) -> Result<()> {
        self.module = None;
        if !self.link.is_connected() {
            return Ok(());
        }

        let timeout = self.config.ctrl_timeout;
        if let Err(e) = self.link.command(Command::Sleep, &[], timeout).await {
            warn!(error = %e, "Module did not go to sleep");
        }

        self.link.disconnect().await?;
        info!("Closed {}", DRIVER_NAME);
        Ok(())
    }

    fn enroller(&mut self) -> Option<&mut dyn Enroll> {
        Some(self)
    }

    fn verifier(&mut self) -> Option<&mut dyn Verify> {
        Some(self)
    }

    fn identifier(&mut self) -> Option<&mut dyn Identify> {
        Some(self)
    }

    fn storage(&mut self) -> Option<&mut dyn Storage> {
        Some(self)
    }

    fn cancel_hook(&self) -> Option<Arc<dyn CancelHook>> {
        Some(self.cancel.clone())
    }
}

#[async_trait]
impl Enroll for MafpDriver {
    async fn enroll(&mut self, ctx: &ActionContext, template: Print) -> Result<Print> {
        let max_id = self.slots()?;
        let serial = self.serial.clone();
        let request = EnrollRequest {
            template: &template,
            serial: &serial,
            max_id,
        };

        let outcome = steps::enroll::run(self.exchange(ctx), request).await;
        self.settle(ctx, outcome).await
    }
}

#[async_trait]
impl Verify for MafpDriver {
    async fn verify(&mut self, ctx: &ActionContext, print: &Print) -> Result<()> {
        let outcome = steps::matching::verify(self.exchange(ctx), print).await;
        self.settle(ctx, outcome).await
    }
}

#[async_trait]
impl Identify for MafpDriver {
    async fn identify(&mut self, ctx: &ActionContext, gallery: &[Print]) -> Result<()> {
        let max_id = self.slots()?;
        let outcome = steps::matching::identify(self.exchange(ctx), gallery, max_id).await;
        self.settle(ctx, outcome).await
    }
}

#[async_trait]
impl Storage for MafpDriver {
    async fn list(&mut self, ctx: &ActionContext) -> Result<Vec<Print>> {
        let serial = self.serial.clone();
        let outcome = steps::list::run(self.exchange(ctx), &serial).await;
        self.settle(ctx, outcome).await
    }

    async fn delete(&mut self, ctx: &ActionContext, print: &Print) -> Result<()> {
        let outcome = steps::delete::run(self.exchange(ctx), print).await;
        self.settle(ctx, outcome).await
    }

    async fn clear(&mut self, ctx: &ActionContext) -> Result<()> {
        let outcome = steps::empty::run(self.exchange(ctx)).await;
        self.settle(ctx, outcome).await
    }

    fn can_clear(&self) -> bool {
        true
    }
}

/// Serial number derived from the transport endpoint, cut to the record field
fn serial_of(endpoint: &str) -> String {
    let mut end = endpoint.len().min(SERIAL_SIZE);
    while !endpoint.is_char_boundary(end) {
        end -= 1;
    }
    endpoint[..end].to_string()
}
