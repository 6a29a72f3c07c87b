//! Fingerprint template records

use std::fmt;

use bytes::Bytes;
use chrono::NaiveDate;

use crate::features::Finger;

/// What kind of template data a print carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrintKind {
    /// Not filled in yet; used as an enroll template
    #[default]
    Undefined,

    /// Driver specific data, only meaningful to the driver and device that made it
    Raw,

    /// Minutiae extracted on the host
    Nbis,
}

/// An enrolled (or to-be-enrolled) fingerprint
///
/// The template data is opaque; only the driver that produced it can
/// interpret it. A print is tied to the driver and device that created it
/// through its compatibility key (driver id + device id).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Print {
    driver: String,
    device_id: String,
    device_stored: bool,
    kind: PrintKind,
    finger: Finger,
    username: Option<String>,
    description: Option<String>,
    enroll_date: Option<NaiveDate>,
    data: Bytes,
}

impl Print {
    /// Create an empty enroll template
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty print already bound to a driver and device
    pub fn for_device(driver: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Set the finger
    pub fn with_finger(mut self, finger: Finger) -> Self {
        self.finger = finger;
        self
    }

    /// Set the owning user name
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set a free-form description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the enrollment date
    pub fn with_enroll_date(mut self, date: NaiveDate) -> Self {
        self.enroll_date = Some(date);
        self
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn kind(&self) -> PrintKind {
        self.kind
    }

    pub fn finger(&self) -> Finger {
        self.finger
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn enroll_date(&self) -> Option<NaiveDate> {
        self.enroll_date
    }

    /// Whether the template lives in the device's own storage
    pub fn device_stored(&self) -> bool {
        self.device_stored
    }

    /// Opaque template data
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether this print is still an empty enroll template
    pub fn is_template(&self) -> bool {
        self.kind == PrintKind::Undefined
    }

    /// Check the compatibility key against a session's identity
    pub fn is_compatible(&self, driver: &str, device_id: &str) -> bool {
        self.driver == driver && self.device_id == device_id
    }

    /// Check whether two prints refer to the same enrolled template
    ///
    /// Metadata such as user name or description is not compared.
    pub fn same_template(&self, other: &Print) -> bool {
        self.kind != PrintKind::Undefined
            && self.kind == other.kind
            && self.driver == other.driver
            && self.device_id == other.device_id
            && self.data == other.data
    }

    /// Fill in template data (driver side)
    pub fn set_data(&mut self, kind: PrintKind, data: impl Into<Bytes>) {
        self.kind = kind;
        self.data = data.into();
    }

    /// Mark the print as kept in device storage (driver side)
    pub fn set_device_stored(&mut self, stored: bool) {
        self.device_stored = stored;
    }

    pub fn set_finger(&mut self, finger: Finger) {
        self.finger = finger;
    }

    pub fn set_username(&mut self, username: Option<String>) {
        self.username = username;
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub fn set_enroll_date(&mut self, date: Option<NaiveDate>) {
        self.enroll_date = date;
    }

    /// Bind the print to a driver and device
    pub fn bind(&mut self, driver: impl Into<String>, device_id: impl Into<String>) {
        self.driver = driver.into();
        self.device_id = device_id.into();
    }
}

impl fmt::Display for Print {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Print[{}/{}](finger={:?}, user={}, len={})",
            self.driver,
            self.device_id,
            self.finger,
            self.username.as_deref().unwrap_or("-"),
            self.data.len()
        )
    }
}
