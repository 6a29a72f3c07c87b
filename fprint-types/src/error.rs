//! Device error taxonomy shared by the session layer and every driver

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Why the user has to present their finger again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKind {
    /// The scan did not succeed, no specific reason.
    General,

    /// The swipe or press was too short.
    TooShort,

    /// The finger was not centered on the sensor.
    CenterFinger,

    /// The finger should be lifted and placed again.
    RemoveFinger,
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::General => "the scan did not succeed, try again",
            Self::TooShort => "the swipe was too short, try again",
            Self::CenterFinger => "the finger was not centered, try again",
            Self::RemoveFinger => "remove the finger and try again",
        };
        f.write_str(text)
    }
}

/// Errors surfaced through a completion handle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The action requires an open device
    #[error("The device has to be opened first")]
    NotOpen,

    /// Open was requested on an open device
    #[error("The device is already open")]
    AlreadyOpen,

    /// Another action is in flight or the device is suspended
    #[error("The device is still busy with another operation")]
    Busy,

    /// The device was unplugged
    #[error("The device has been removed from the system")]
    Removed,

    /// Caller passed unusable input
    #[error("The passed data is invalid: {0}")]
    DataInvalid(String),

    /// The driver lacks the capability
    #[error("The operation is not supported on this device: {0}")]
    NotSupported(String),

    /// Thermal protection refused the action
    #[error("The device needs to cool down before it can be used again")]
    TooHot,

    /// Interaction problem; prompt the user and start the action again
    #[error("{0}")]
    Retry(RetryKind),

    /// Hardware did not answer in time
    #[error("The device did not respond in time")]
    Timeout,

    /// Malformed or corrupt protocol exchange
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The action was cancelled
    #[error("The operation was cancelled")]
    Cancelled,

    /// The requested print does not exist on the device
    #[error("The print was not found on the device")]
    DataNotFound,

    /// Device storage is exhausted
    #[error("No space on device available for operation")]
    DataFull,

    /// The finger is already enrolled
    #[error("This finger has already been enrolled")]
    DataDuplicate,

    /// Catch-all driver fault
    #[error("An unspecified error occurred: {0}")]
    General(String),
}

impl Error {
    /// Build a [`Error::DataInvalid`] from anything printable
    pub fn data_invalid(msg: impl Into<String>) -> Self {
        Self::DataInvalid(msg.into())
    }

    /// Build a [`Error::NotSupported`] from anything printable
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Build a [`Error::Protocol`] from anything printable
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Build a [`Error::General`] from anything printable
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// Check if the caller should re-prompt the user and run the action again
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }

    /// Check if this error is the result of a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if running the same action later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy
                | Self::TooHot
                | Self::Retry(_)
                | Self::Timeout
                | Self::Cancelled
        )
    }
}
