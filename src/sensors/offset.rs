//! Temperature offset derivation.
//!
//! A user stores one correction value in either scale; both derived offsets are
//! kept on the record so every read path can apply them without converting.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Scale a stored offset was expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OffsetUnit {
    Celsius,
    Fahrenheit,
}

/// Offsets derived from one user-supplied correction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TemperatureOffset {
    pub celsius: f64,
    pub fahrenheit: f64,
}

/// Derive both offsets from a value and the unit it was given in.
///
/// A zero offset yields zero in both scales.
pub fn compute_offset(offset: f64, unit: OffsetUnit) -> TemperatureOffset {
    if offset == 0.0 {
        return TemperatureOffset::default();
    }
    match unit {
        OffsetUnit::Celsius => TemperatureOffset {
            celsius: offset,
            fahrenheit: offset * 1.8 + 32.0,
        },
        OffsetUnit::Fahrenheit => TemperatureOffset {
            celsius: (offset - 32.0) / 1.8,
            fahrenheit: offset,
        },
    }
}
