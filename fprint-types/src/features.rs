//! Capability flags and small device-state enums

use std::fmt;

bitflags::bitflags! {
    /// Features a driver declares for its devices
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        /// Raw image capture
        const CAPTURE = 1 << 0;
        /// One-to-many matching
        const IDENTIFY = 1 << 1;
        /// One-to-one matching
        const VERIFY = 1 << 2;
        /// Prints are stored on the device
        const STORAGE = 1 << 3;
        /// Stored prints can be listed
        const STORAGE_LIST = 1 << 4;
        /// Stored prints can be deleted one by one
        const STORAGE_DELETE = 1 << 5;
        /// The whole storage can be erased
        const STORAGE_CLEAR = 1 << 6;
        /// Enrolling checks for duplicates on the device
        const DUPLICATES_CHECK = 1 << 7;
        /// The sensor may stay powered indefinitely
        const ALWAYS_ON = 1 << 8;
        /// Enroll can update an existing print in place
        const UPDATE_PRINT = 1 << 9;
    }
}

bitflags::bitflags! {
    /// What the driver currently knows about the finger on the sensor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FingerStatus: u8 {
        /// The driver is waiting for a finger
        const NEEDED = 1 << 0;
        /// A finger is on the sensor
        const PRESENT = 1 << 1;
    }
}

/// How the finger is presented to the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanType {
    /// The finger is swiped over a line sensor
    Swipe,
    /// The finger is pressed onto an area sensor
    #[default]
    Press,
}

/// Thermal category of the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Temperature {
    #[default]
    Cold,
    Warm,
    Hot,
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Hot => "hot",
        };
        f.write_str(name)
    }
}

/// Finger a print was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Finger {
    #[default]
    Unknown = 0,
    LeftThumb = 1,
    LeftIndex = 2,
    LeftMiddle = 3,
    LeftRing = 4,
    LeftLittle = 5,
    RightThumb = 6,
    RightIndex = 7,
    RightMiddle = 8,
    RightRing = 9,
    RightLittle = 10,
}

impl Finger {
    /// All fingers in numbering order
    pub const ALL: [Finger; 11] = [
        Self::Unknown,
        Self::LeftThumb,
        Self::LeftIndex,
        Self::LeftMiddle,
        Self::LeftRing,
        Self::LeftLittle,
        Self::RightThumb,
        Self::RightIndex,
        Self::RightMiddle,
        Self::RightRing,
        Self::RightLittle,
    ];

    /// Look a finger up by its number; out-of-range numbers map to `Unknown`
    pub fn from_number(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(Self::Unknown)
    }

    /// Numeric code used in serialized records
    pub fn number(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_contains() {
        let features = Features::VERIFY | Features::STORAGE | Features::STORAGE_DELETE;
        assert!(features.contains(Features::VERIFY));
        assert!(features.contains(Features::STORAGE | Features::STORAGE_DELETE));
        assert!(!features.contains(Features::IDENTIFY));
    }

    #[test]
    fn test_finger_numbering() {
        assert_eq!(Finger::from_number(7), Finger::RightIndex);
        assert_eq!(Finger::RightIndex.number(), 7);
        assert_eq!(Finger::from_number(42), Finger::Unknown);
    }

    #[test]
    fn test_temperature_order() {
        assert!(Temperature::Cold < Temperature::Warm);
        assert!(Temperature::Warm < Temperature::Hot);
    }
}
