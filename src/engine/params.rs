//! Caller supplied parameters of the control operations.
//!
//! Every field is optional on the wire so a missing field is reported by
//! name instead of failing deserialisation. `validate` checks presence of
//! all required fields first, then their domains.

use crate::error::{Result, SensorsError};
use crate::sensors::OffsetUnit;
use serde::Deserialize;
use std::str::FromStr;

/// Line carrying the 1-wire bus when none is given.
pub const DEFAULT_ONEWIRE_GPIO: &str = "GPIO4";

fn default_onewire_gpio() -> Option<String> {
    Some(DEFAULT_ONEWIRE_GPIO.to_string())
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(SensorsError::MissingParameter(field)),
    }
}

fn present<T: Copy>(field: &'static str, value: Option<T>) -> Result<T> {
    value.ok_or(SensorsError::MissingParameter(field))
}

fn interval(value: i64) -> Result<u64> {
    u64::try_from(value)
        .ok()
        .filter(|interval| *interval > 0)
        .ok_or_else(|| SensorsError::invalid("interval", "must be greater than 0"))
}

fn offset(value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SensorsError::invalid("offset", "must be 0 or greater"))
    }
}

fn offset_unit(value: &str) -> Result<OffsetUnit> {
    OffsetUnit::from_str(value)
        .map_err(|_| SensorsError::invalid("offset_unit", "must be celsius or fahrenheit"))
}

/// Validated polling settings of a temperature sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Polling {
    pub interval: u64,
    pub offset: f64,
    pub offset_unit: OffsetUnit,
}

impl Polling {
    fn validate(raw_interval: i64, raw_offset: f64, raw_unit: &str) -> Result<Self> {
        Ok(Self {
            interval: interval(raw_interval)?,
            offset: offset(raw_offset)?,
            offset_unit: offset_unit(raw_unit)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnewireParams {
    pub name: Option<String>,
    /// 1-wire device id, e.g. `28-000005e2fdc3`
    pub device: Option<String>,
    /// Slave file of the device
    pub path: Option<String>,
    pub interval: Option<i64>,
    pub offset: Option<f64>,
    pub offset_unit: Option<String>,
    #[serde(default = "default_onewire_gpio")]
    pub gpio: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidOnewire {
    pub name: String,
    pub device: String,
    pub path: String,
    pub gpio: String,
    pub polling: Polling,
}

impl OnewireParams {
    pub fn validate(&self) -> Result<ValidOnewire> {
        let name = required("name", &self.name)?;
        let device = required("device", &self.device)?;
        let path = required("path", &self.path)?;
        let raw_interval = present("interval", self.interval)?;
        let raw_offset = present("offset", self.offset)?;
        let raw_unit = required("offset_unit", &self.offset_unit)?;
        let gpio = required("gpio", &self.gpio)?;

        Ok(ValidOnewire {
            name: name.to_string(),
            device: device.to_string(),
            path: path.to_string(),
            gpio: gpio.to_string(),
            polling: Polling::validate(raw_interval, raw_offset, raw_unit)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnewireUpdate {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub interval: Option<i64>,
    pub offset: Option<f64>,
    pub offset_unit: Option<String>,
}

/// Validated update of a polled temperature or DHT22 sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPollingUpdate {
    pub name: String,
    pub polling: Polling,
}

fn validate_polling_update(
    name: &Option<String>,
    raw_interval: Option<i64>,
    raw_offset: Option<f64>,
    raw_unit: &Option<String>,
) -> Result<ValidPollingUpdate> {
    let name = required("name", name)?;
    let raw_interval = present("interval", raw_interval)?;
    let raw_offset = present("offset", raw_offset)?;
    let raw_unit = required("offset_unit", raw_unit)?;

    Ok(ValidPollingUpdate {
        name: name.to_string(),
        polling: Polling::validate(raw_interval, raw_offset, raw_unit)?,
    })
}

impl OnewireUpdate {
    pub fn uuid(&self) -> Result<&str> {
        required("uuid", &self.uuid)
    }

    pub fn validate(&self) -> Result<ValidPollingUpdate> {
        validate_polling_update(&self.name, self.interval, self.offset, &self.offset_unit)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MotionParams {
    pub name: Option<String>,
    pub gpio: Option<String>,
    /// Active low detector
    pub inverted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidMotion {
    pub name: String,
    pub gpio: String,
    pub inverted: bool,
}

impl MotionParams {
    pub fn validate(&self) -> Result<ValidMotion> {
        let name = required("name", &self.name)?;
        let gpio = required("gpio", &self.gpio)?;
        let inverted = present("inverted", self.inverted)?;
        Ok(ValidMotion {
            name: name.to_string(),
            gpio: gpio.to_string(),
            inverted,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MotionUpdate {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub inverted: Option<bool>,
}

impl MotionUpdate {
    pub fn uuid(&self) -> Result<&str> {
        required("uuid", &self.uuid)
    }

    pub fn validate(&self) -> Result<ValidMotionUpdate> {
        let name = required("name", &self.name)?;
        let inverted = present("inverted", self.inverted)?;
        Ok(ValidMotionUpdate {
            name: name.to_string(),
            inverted,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidMotionUpdate {
    pub name: String,
    pub inverted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dht22Params {
    pub name: Option<String>,
    pub gpio: Option<String>,
    pub interval: Option<i64>,
    pub offset: Option<f64>,
    pub offset_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidDht22 {
    pub name: String,
    pub gpio: String,
    pub polling: Polling,
}

impl Dht22Params {
    pub fn validate(&self) -> Result<ValidDht22> {
        let name = required("name", &self.name)?;
        let gpio = required("gpio", &self.gpio)?;
        let raw_interval = present("interval", self.interval)?;
        let raw_offset = present("offset", self.offset)?;
        let raw_unit = required("offset_unit", &self.offset_unit)?;

        Ok(ValidDht22 {
            name: name.to_string(),
            gpio: gpio.to_string(),
            polling: Polling::validate(raw_interval, raw_offset, raw_unit)?,
        })
    }
}

/// Update of a DHT22 probe; `uuid` may designate either half.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dht22Update {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub interval: Option<i64>,
    pub offset: Option<f64>,
    pub offset_unit: Option<String>,
}

impl Dht22Update {
    pub fn uuid(&self) -> Result<&str> {
        required("uuid", &self.uuid)
    }

    pub fn validate(&self) -> Result<ValidPollingUpdate> {
        validate_polling_update(&self.name, self.interval, self.offset, &self.offset_unit)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteParams {
    pub uuid: Option<String>,
}

impl DeleteParams {
    pub fn uuid(&self) -> Result<&str> {
        required("uuid", &self.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onewire() -> OnewireParams {
        OnewireParams {
            name: Some("outdoor".to_string()),
            device: Some("28-000005e2fdc3".to_string()),
            path: Some("/sys/bus/w1/devices/28-000005e2fdc3/w1_slave".to_string()),
            interval: Some(60),
            offset: Some(0.0),
            offset_unit: Some("celsius".to_string()),
            gpio: default_onewire_gpio(),
        }
    }

    #[test]
    fn test_valid_onewire() {
        let valid = onewire().validate().unwrap();
        assert_eq!(valid.gpio, "GPIO4");
        assert_eq!(
            valid.polling,
            Polling {
                interval: 60,
                offset: 0.0,
                offset_unit: OffsetUnit::Celsius,
            }
        );
    }

    #[test]
    fn test_missing_fields_are_named() {
        let mut params = onewire();
        params.device = Some("  ".to_string());
        assert_eq!(params.validate().unwrap_err().field(), Some("device"));

        let mut params = onewire();
        params.interval = None;
        assert!(matches!(
            params.validate(),
            Err(SensorsError::MissingParameter("interval"))
        ));
    }

    #[test]
    fn test_presence_checked_before_domains() {
        let mut params = onewire();
        params.interval = Some(0);
        params.offset_unit = None;
        assert_eq!(params.validate().unwrap_err().field(), Some("offset_unit"));
    }

    #[test]
    fn test_domains() {
        let mut params = onewire();
        params.interval = Some(-5);
        assert_eq!(params.validate().unwrap_err().field(), Some("interval"));

        let mut params = onewire();
        params.offset = Some(-1.0);
        assert_eq!(params.validate().unwrap_err().field(), Some("offset"));

        let mut params = onewire();
        params.offset_unit = Some("kelvin".to_string());
        assert_eq!(params.validate().unwrap_err().field(), Some("offset_unit"));
    }

    #[test]
    fn test_onewire_gpio_defaults_when_absent() {
        let params: OnewireParams = serde_json::from_str(
            r#"{"name": "outdoor", "device": "28-0000", "path": "/w1_slave", "interval": 60, "offset": 0, "offset_unit": "celsius"}"#,
        )
        .unwrap();
        assert_eq!(params.gpio.as_deref(), Some("GPIO4"));
    }

    #[test]
    fn test_motion_inverted_is_required() {
        let mut params = MotionParams {
            name: Some("hall".to_string()),
            gpio: Some("GPIO18".to_string()),
            inverted: None,
        };
        assert!(matches!(
            params.validate(),
            Err(SensorsError::MissingParameter("inverted"))
        ));
        params.inverted = Some(false);
        assert!(!params.validate().unwrap().inverted);
        assert_eq!(
            MotionParams::default().validate().unwrap_err().field(),
            Some("name")
        );

        let update = MotionUpdate {
            uuid: Some("m-1".to_string()),
            name: Some("porch".to_string()),
            inverted: None,
        };
        assert_eq!(update.validate().unwrap_err().field(), Some("inverted"));
    }

    #[test]
    fn test_update_requires_uuid() {
        assert!(matches!(
            Dht22Update::default().uuid(),
            Err(SensorsError::MissingParameter("uuid"))
        ));
    }
}
