//! Template records
//!
//! Every enrolled template is identified by its slot id and a uid string
//! stored next to it on the module. The print data handed to callers is the
//! whole record:
//!
//! ```text
//! ┌──────────────────┬──────────┬─────────────────────────────────────┐
//! │  Serial number   │    Id    │                 Uid                 │
//! │ 32 bytes, NUL pad│ (BE u16) │  "FP1-yyyymmdd-finger-user", NUL pad │
//! └──────────────────┴──────────┴─────────────────────────────────────┘
//! ```

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use chrono::NaiveDate;
use fprint_types::{Finger, Print, PrintKind};

use crate::constants::record::{ID_SIZE, RECORD_SIZE, SERIAL_SIZE, UID_SIZE};
use crate::error::{Error, Result};

const UID_PREFIX: &str = "FP1";
const DATE_FORMAT: &str = "%Y%m%d";

/// Decoded uid of a stored template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uid {
    pub enroll_date: NaiveDate,
    pub finger: Finger,
    pub username: String,
}

impl Uid {
    pub fn new(enroll_date: NaiveDate, finger: Finger, username: impl Into<String>) -> Self {
        Self {
            enroll_date,
            finger,
            username: username.into(),
        }
    }

    /// Encode as the NUL padded on-module form, truncating long user names
    pub fn to_bytes(&self) -> [u8; UID_SIZE] {
        let mut out = [0u8; UID_SIZE];
        let text = self.to_string();
        let len = text.len().min(UID_SIZE - 1);
        out[..len].copy_from_slice(&text.as_bytes()[..len]);
        out
    }

    /// Parse the on-module form; `None` for foreign or empty uids
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = c_string(raw);
        let mut parts = text.splitn(4, '-');

        if parts.next()? != UID_PREFIX {
            return None;
        }
        let enroll_date = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
        let finger = Finger::from_number(parts.next()?.parse().ok()?);
        let username = parts.next().unwrap_or_default().to_string();

        Some(Self {
            enroll_date,
            finger,
            username,
        })
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            UID_PREFIX,
            self.enroll_date.format(DATE_FORMAT),
            self.finger.number(),
            self.username
        )
    }
}

/// Serial, slot id and uid of one template
#[derive(Clone, PartialEq, Eq)]
pub struct TemplateRecord {
    pub serial: String,
    pub id: u16,
    pub uid: [u8; UID_SIZE],
}

impl TemplateRecord {
    pub fn new(serial: impl Into<String>, id: u16, uid: &Uid) -> Self {
        Self {
            serial: serial.into(),
            id,
            uid: uid.to_bytes(),
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];

        let serial = self.serial.as_bytes();
        let len = serial.len().min(SERIAL_SIZE);
        out[..len].copy_from_slice(&serial[..len]);

        BigEndian::write_u16(&mut out[SERIAL_SIZE..SERIAL_SIZE + ID_SIZE], self.id);
        out[SERIAL_SIZE + ID_SIZE..].copy_from_slice(&self.uid);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < RECORD_SIZE {
            return Err(Error::Truncated {
                what: "template record",
                needed: RECORD_SIZE,
                actual: raw.len(),
            });
        }

        let mut uid = [0u8; UID_SIZE];
        uid.copy_from_slice(&raw[SERIAL_SIZE + ID_SIZE..RECORD_SIZE]);

        Ok(Self {
            serial: c_string(&raw[..SERIAL_SIZE]),
            id: BigEndian::read_u16(&raw[SERIAL_SIZE..SERIAL_SIZE + ID_SIZE]),
            uid,
        })
    }

    pub fn uid(&self) -> Option<Uid> {
        Uid::parse(&self.uid)
    }

    /// Read the record back out of a print made by this driver
    pub fn from_print(print: &Print) -> Result<Self> {
        Self::decode(print.data())
    }

    /// Wrap the record into a device-stored print
    pub fn to_print(&self, driver: &str) -> Print {
        let mut print = Print::for_device(driver, "");
        if let Some(uid) = self.uid() {
            print.set_finger(uid.finger);
            print.set_enroll_date(Some(uid.enroll_date));
            if !uid.username.is_empty() {
                print.set_username(Some(uid.username));
            }
        }
        print.set_description(Some(format!("slot {}", self.id)));
        print.set_device_stored(true);
        print.set_data(PrintKind::Raw, self.encode().to_vec());
        print
    }
}

impl fmt::Debug for TemplateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRecord")
            .field("serial", &self.serial)
            .field("id", &self.id)
            .field("uid", &c_string(&self.uid))
            .finish()
    }
}

/// Text up to the first NUL
pub(crate) fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
