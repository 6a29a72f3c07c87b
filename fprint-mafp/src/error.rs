//! Error types for fprint-mafp

use crate::command::Command;
use crate::constants::result;
use crate::packet::Mark;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol and link errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooShort { expected: usize, actual: usize },

    /// Frame does not start with the sync bytes
    #[error("Bad sync bytes: 0x{0:02X} 0x{1:02X}")]
    BadSync(u8, u8),

    /// CRC verification failed
    #[error("CRC mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    /// Payload does not fit one frame
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    /// A valid frame arrived where another role was expected
    #[error("Unexpected {actual} frame, expected {expected}")]
    UnexpectedMark { expected: &'static str, actual: Mark },

    /// Mark byte not defined by the protocol
    #[error("Unknown frame mark: 0x{0:02X}")]
    UnknownMark(u8),

    /// Answer or record shorter than its layout
    #[error("Truncated {what}: {actual} bytes, need {needed}")]
    Truncated {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Unknown command code
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Handshake answer did not echo the code
    #[error("Handshake failed: got {0:02X?}")]
    Handshake(Vec<u8>),

    /// Module answered with a failure code
    #[error("{command} failed with result 0x{code:02X}")]
    Device { command: Command, code: u8 },

    /// Link error
    #[error("Transport error: {0}")]
    Transport(#[from] fprint_transport::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(fprint_transport::Error::Io(err))
    }
}

impl Error {
    /// Check if the frame itself was malformed or corrupt
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::BadSync(..)
                | Self::CrcMismatch { .. }
                | Self::UnexpectedMark { .. }
                | Self::UnknownMark(_)
                | Self::Truncated { .. }
        )
    }
}

impl From<Error> for fprint_types::Error {
    fn from(err: Error) -> Self {
        use fprint_transport::Error as Link;

        match err {
            Error::Transport(Link::ReadTimeout) => Self::Timeout,
            Error::Transport(Link::ConnectionClosed) => Self::Removed,
            Error::Device {
                code: result::TPL_NUM_OVERSIZE,
                ..
            } => Self::DataFull,
            Error::Device { command, code } => {
                Self::general(format!("{command} failed with result 0x{code:02X}"))
            }
            Error::Transport(e) => Self::general(e.to_string()),
            e => Self::protocol(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_mapping() {
        let err: fprint_types::Error = Error::Transport(fprint_transport::Error::ReadTimeout).into();
        assert_eq!(err, fprint_types::Error::Timeout);

        let err: fprint_types::Error = Error::CrcMismatch {
            expected: 1,
            received: 2,
        }
        .into();
        assert!(matches!(err, fprint_types::Error::Protocol(_)));

        let err: fprint_types::Error = Error::Device {
            command: Command::GetTemplateTable,
            code: result::TPL_NUM_OVERSIZE,
        }
        .into();
        assert_eq!(err, fprint_types::Error::DataFull);
    }

    #[test]
    fn test_framing_classification() {
        assert!(Error::UnknownMark(0x44).is_framing());
        assert!(!Error::UnknownCommand(0x44).is_framing());
    }
}
