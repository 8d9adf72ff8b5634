use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SimError, SimResult};

/// Simulated time in seconds.
pub type SimTime = f64;

/// Width of a signal or bus in bits, always within `1..=64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BitWidth(u32);

impl BitWidth {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 64;

    pub const ONE: BitWidth = BitWidth(1);
    pub const BYTE: BitWidth = BitWidth(8);
    pub const WORD: BitWidth = BitWidth(16);

    pub fn new(bits: u32) -> SimResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&bits) {
            Ok(BitWidth(bits))
        } else {
            Err(SimError::InvalidBitWidth(bits))
        }
    }

    /// Clamp an arbitrary width into the legal range.
    pub fn saturating(bits: u32) -> Self {
        BitWidth(bits.clamp(Self::MIN, Self::MAX))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn mask(&self) -> u64 {
        if self.0 >= 64 {
            u64::MAX
        } else {
            (1u64 << self.0) - 1
        }
    }

    pub fn apply(&self, value: u64) -> u64 {
        value & self.mask()
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.0)
    }
}

impl TryFrom<u32> for BitWidth {
    type Error = SimError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BitWidth::new(value)
    }
}

impl From<BitWidth> for u32 {
    fn from(value: BitWidth) -> Self {
        value.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(BitWidth::ONE.mask(), 0x1);
        assert_eq!(BitWidth::BYTE.mask(), 0xFF);
        assert_eq!(BitWidth::WORD.mask(), 0xFFFF);
        assert_eq!(BitWidth::new(64).unwrap().mask(), u64::MAX);
        assert_eq!(BitWidth::new(12).unwrap().apply(0x1234), 0x234);
    }

    #[test]
    fn test_out_of_range_widths() {
        assert!(BitWidth::new(0).is_err());
        assert!(BitWidth::new(65).is_err());
        assert_eq!(BitWidth::saturating(0).bits(), 1);
        assert_eq!(BitWidth::saturating(100).bits(), 64);
    }

    #[test]
    fn test_serde_rejects_invalid_width() {
        let width: BitWidth = serde_json::from_str("4").unwrap();
        assert_eq!(width.bits(), 4);
        assert!(serde_json::from_str::<BitWidth>("0").is_err());
        assert_eq!(serde_json::to_string(&width).unwrap(), "4");
    }
}
