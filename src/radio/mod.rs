pub mod airtime;
pub mod channel;

pub use airtime::{AirtimeModel, LoraModulation};
pub use channel::{ChannelModel, ChannelParams, GeoPoint, LinkQuality};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Number of supported spreading factors (SF7..SF12).
pub const SF_COUNT: usize = 6;

/// Per-spreading-factor lookup table, indexed by [`SpreadingFactor::index`].
pub type SfTable<T> = [T; SF_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpreadingFactor {
    Sf7,
    Sf8,
    Sf9,
    Sf10,
    Sf11,
    Sf12,
}

const_assert_eq!(SpreadingFactor::ALL.len(), SF_COUNT);

impl SpreadingFactor {
    pub const ALL: [SpreadingFactor; 6] = [
        SpreadingFactor::Sf7,
        SpreadingFactor::Sf8,
        SpreadingFactor::Sf9,
        SpreadingFactor::Sf10,
        SpreadingFactor::Sf11,
        SpreadingFactor::Sf12,
    ];

    pub fn value(self) -> u8 {
        match self {
            SpreadingFactor::Sf7 => 7,
            SpreadingFactor::Sf8 => 8,
            SpreadingFactor::Sf9 => 9,
            SpreadingFactor::Sf10 => 10,
            SpreadingFactor::Sf11 => 11,
            SpreadingFactor::Sf12 => 12,
        }
    }

    /// Position in an [`SfTable`].
    pub fn index(self) -> usize {
        (self.value() - 7) as usize
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            7 => Ok(SpreadingFactor::Sf7),
            8 => Ok(SpreadingFactor::Sf8),
            9 => Ok(SpreadingFactor::Sf9),
            10 => Ok(SpreadingFactor::Sf10),
            11 => Ok(SpreadingFactor::Sf11),
            12 => Ok(SpreadingFactor::Sf12),
            other => Err(ConfigError::InvalidSpreadingFactor(other)),
        }
    }
}

impl From<SpreadingFactor> for u8 {
    fn from(sf: SpreadingFactor) -> Self {
        sf.value()
    }
}

impl core::fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SF{}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spreading_factor_range() {
        for raw in 7..=12u8 {
            let sf = SpreadingFactor::try_from(raw).unwrap();
            assert_eq!(sf.value(), raw);
            assert_eq!(SpreadingFactor::ALL[sf.index()], sf);
        }
        assert_eq!(
            SpreadingFactor::try_from(6),
            Err(ConfigError::InvalidSpreadingFactor(6))
        );
        assert!(SpreadingFactor::try_from(13).is_err());
    }

    #[test]
    fn test_spreading_factor_ordering_and_serde() {
        assert!(SpreadingFactor::Sf7 < SpreadingFactor::Sf12);
        assert_eq!(serde_json::to_string(&SpreadingFactor::Sf9).unwrap(), "9");
        let sf: SpreadingFactor = serde_json::from_str("11").unwrap();
        assert_eq!(sf, SpreadingFactor::Sf11);
        assert!(serde_json::from_str::<SpreadingFactor>("5").is_err());
        assert_eq!(SpreadingFactor::Sf10.to_string(), "SF10");
    }
}
