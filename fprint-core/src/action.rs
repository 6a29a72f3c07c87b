//! Action tags

use std::fmt;

/// One user-requested device operation
///
/// At most one action is live on a device at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Probe,
    Open,
    Close,
    Enroll,
    Verify,
    Identify,
    Capture,
    Delete,
    List,
    ClearStorage,
}

impl Action {
    /// Actions that engage the sensor and wait for user interaction
    ///
    /// These are the ones subject to thermal gating and the ones that can be
    /// parked on suspend.
    pub fn is_long_running(self) -> bool {
        matches!(
            self,
            Self::Enroll | Self::Verify | Self::Identify | Self::Capture
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Open => "open",
            Self::Close => "close",
            Self::Enroll => "enroll",
            Self::Verify => "verify",
            Self::Identify => "identify",
            Self::Capture => "capture",
            Self::Delete => "delete",
            Self::List => "list",
            Self::ClearStorage => "clear-storage",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_running() {
        assert!(Action::Enroll.is_long_running());
        assert!(Action::Capture.is_long_running());
        assert!(!Action::List.is_long_running());
        assert!(!Action::Open.is_long_running());
    }

    #[test]
    fn test_display() {
        assert_eq!(Action::ClearStorage.to_string(), "clear-storage");
    }
}
