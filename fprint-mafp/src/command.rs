//! Command codes

use std::fmt;

use crate::error::{Error, Result};

/// Module command codes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    // Image and features
    GetImage = 0x01,
    GenFeature = 0x02,
    Search = 0x04,
    GenTemplate = 0x05,

    // Template storage
    SaveTemplate = 0x06,
    ReadTemplate = 0x07,
    DeleteTemplate = 0x0C,
    Empty = 0x0D,
    GetTemplateNum = 0x1D,
    GetTemplateTable = 0x1F,

    // Module control
    Cancel = 0x30,
    Sleep = 0x33,
    Handshake = 0x35,

    // Matching and metadata
    MatchWithFid = 0x66,
    GetMaxId = 0x6D,
    DupAreaTest = 0x6F,
    SaveTemplateInfo = 0x86,
    GetTemplateInfo = 0x87,
    GetInitStatus = 0x88,
}

impl Command {
    /// Commands whose answer is followed by a data phase
    pub fn has_data_answer(self) -> bool {
        matches!(self, Self::GetTemplateTable | Self::GetTemplateInfo)
    }

    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::GetImage => "GET_IMAGE",
            Self::GenFeature => "GEN_FEATURE",
            Self::Search => "SEARCH",
            Self::GenTemplate => "GEN_TEMPLATE",
            Self::SaveTemplate => "SAVE_TEMPLATE",
            Self::ReadTemplate => "READ_TEMPLATE",
            Self::DeleteTemplate => "DELETE_TEMPLATE",
            Self::Empty => "EMPTY",
            Self::GetTemplateNum => "GET_TEMPLATE_NUM",
            Self::GetTemplateTable => "GET_TEMPLATE_TABLE",
            Self::Cancel => "CANCEL",
            Self::Sleep => "SLEEP",
            Self::Handshake => "HANDSHAKE",
            Self::MatchWithFid => "MATCH_WITHFID",
            Self::GetMaxId => "GET_MAX_ID",
            Self::DupAreaTest => "DUPAREA_TEST",
            Self::SaveTemplateInfo => "SAVE_TEMPLATE_INFO",
            Self::GetTemplateInfo => "GET_TEMPLATE_INFO",
            Self::GetInitStatus => "GET_INIT_STATUS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        cmd as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::GetImage),
            0x02 => Ok(Self::GenFeature),
            0x04 => Ok(Self::Search),
            0x05 => Ok(Self::GenTemplate),
            0x06 => Ok(Self::SaveTemplate),
            0x07 => Ok(Self::ReadTemplate),
            0x0C => Ok(Self::DeleteTemplate),
            0x0D => Ok(Self::Empty),
            0x1D => Ok(Self::GetTemplateNum),
            0x1F => Ok(Self::GetTemplateTable),
            0x30 => Ok(Self::Cancel),
            0x33 => Ok(Self::Sleep),
            0x35 => Ok(Self::Handshake),
            0x66 => Ok(Self::MatchWithFid),
            0x6D => Ok(Self::GetMaxId),
            0x6F => Ok(Self::DupAreaTest),
            0x86 => Ok(Self::SaveTemplateInfo),
            0x87 => Ok(Self::GetTemplateInfo),
            0x88 => Ok(Self::GetInitStatus),
            _ => Err(Error::UnknownCommand(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_conversion() {
        let cmd = Command::Handshake;
        let value: u8 = cmd.into();
        assert_eq!(value, 0x35);

        let parsed = Command::try_from(0x35).unwrap();
        assert_eq!(parsed, Command::Handshake);
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            Command::try_from(0xEE),
            Err(Error::UnknownCommand(0xEE))
        ));
    }

    #[test]
    fn test_data_answers() {
        assert!(Command::GetTemplateInfo.has_data_answer());
        assert!(!Command::GetImage.has_data_answer());
    }

    #[test]
    fn test_display() {
        assert_eq!(Command::GetMaxId.to_string(), "GET_MAX_ID(0x6D)");
    }
}
