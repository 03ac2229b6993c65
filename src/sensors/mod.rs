//! Sensor records as stored in the catalog.
//!
//! A record is the read model of one logical sensor: the line(s) it is wired
//! to, its polling configuration and its latest value. A DHT22 probe is stored
//! as two records (temperature and humidity) sharing one name and one line.

pub mod offset;

pub use offset::{OffsetUnit, TemperatureOffset, compute_offset};

use serde::{Deserialize, Serialize};
use strum::Display;

/// Line assigned to a sensor by the gpio ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioAssignment {
    /// Logical line name (e.g. "GPIO4")
    pub gpio: String,
    /// Allocation identifier returned by the ledger
    pub gpio_uuid: String,
    /// Physical header pin
    pub pin: u32,
}

/// Hardware family a record was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SensorSubtype {
    Onewire,
    Dht22,
    Generic,
}

/// Measured quantity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Motion,
}

/// Polling and reading behaviour shared by every record of one hardware family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SensorFamily {
    /// DS18B20 probe on the 1-wire bus, read from its sysfs slave file
    Onewire,
    /// Temperature + humidity probe read through an external binary
    Dht22,
    /// Edge triggered motion detector, never polled
    Motion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureState {
    /// Polling period in seconds
    pub interval: u64,
    pub offset: f64,
    pub offset_unit: OffsetUnit,
    pub offset_celsius: f64,
    pub offset_fahrenheit: f64,
    pub celsius: Option<f64>,
    pub fahrenheit: Option<f64>,
    /// 1-wire device id (onewire only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// 1-wire slave file (onewire only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl TemperatureState {
    pub fn new(interval: u64, offset: f64, offset_unit: OffsetUnit) -> Self {
        let mut state = Self {
            interval,
            offset,
            offset_unit,
            offset_celsius: 0.0,
            offset_fahrenheit: 0.0,
            celsius: None,
            fahrenheit: None,
            device: None,
            path: None,
        };
        state.set_offset(offset, offset_unit);
        state
    }

    /// Store a new offset and recompute both derived values.
    pub fn set_offset(&mut self, offset: f64, offset_unit: OffsetUnit) {
        let derived = compute_offset(offset, offset_unit);
        self.offset = offset;
        self.offset_unit = offset_unit;
        self.offset_celsius = derived.celsius;
        self.offset_fahrenheit = derived.fahrenheit;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityState {
    /// Polling period in seconds
    pub interval: u64,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub on: bool,
    pub inverted: bool,
    /// Duration in seconds of the last completed detection
    pub lastduration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SensorKind {
    Temperature(TemperatureState),
    Humidity(HumidityState),
    Motion(MotionState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Catalog identifier, assigned on insert
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub subtype: SensorSubtype,
    pub gpios: Vec<GpioAssignment>,
    /// Epoch seconds of the last value change
    #[serde(default)]
    pub lastupdate: i64,
    #[serde(flatten)]
    pub kind: SensorKind,
}

impl SensorRecord {
    /// DS18B20 temperature probe.
    pub fn onewire(
        name: impl Into<String>,
        gpio: GpioAssignment,
        device: impl Into<String>,
        path: impl Into<String>,
        interval: u64,
        offset: f64,
        offset_unit: OffsetUnit,
    ) -> Self {
        let mut state = TemperatureState::new(interval, offset, offset_unit);
        state.device = Some(device.into());
        state.path = Some(path.into());
        Self {
            uuid: String::new(),
            name: name.into(),
            subtype: SensorSubtype::Onewire,
            gpios: vec![gpio],
            lastupdate: now(),
            kind: SensorKind::Temperature(state),
        }
    }

    /// Temperature half of a DHT22 probe.
    pub fn dht22_temperature(
        name: impl Into<String>,
        gpio: GpioAssignment,
        interval: u64,
        offset: f64,
        offset_unit: OffsetUnit,
    ) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            subtype: SensorSubtype::Dht22,
            gpios: vec![gpio],
            lastupdate: now(),
            kind: SensorKind::Temperature(TemperatureState::new(interval, offset, offset_unit)),
        }
    }

    /// Humidity half of a DHT22 probe.
    pub fn dht22_humidity(name: impl Into<String>, gpio: GpioAssignment, interval: u64) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            subtype: SensorSubtype::Dht22,
            gpios: vec![gpio],
            lastupdate: now(),
            kind: SensorKind::Humidity(HumidityState {
                interval,
                humidity: None,
            }),
        }
    }

    /// Generic PIR style motion detector.
    pub fn motion(name: impl Into<String>, gpio: GpioAssignment, inverted: bool) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            subtype: SensorSubtype::Generic,
            gpios: vec![gpio],
            lastupdate: 0,
            kind: SensorKind::Motion(MotionState {
                on: false,
                inverted,
                lastduration: 0.0,
            }),
        }
    }

    pub fn sensor_type(&self) -> SensorType {
        match self.kind {
            SensorKind::Temperature(_) => SensorType::Temperature,
            SensorKind::Humidity(_) => SensorType::Humidity,
            SensorKind::Motion(_) => SensorType::Motion,
        }
    }

    /// Family driving polling and reads, `None` for unsupported type/subtype pairs.
    pub fn family(&self) -> Option<SensorFamily> {
        match (&self.kind, self.subtype) {
            (SensorKind::Temperature(_), SensorSubtype::Onewire) => Some(SensorFamily::Onewire),
            (SensorKind::Temperature(_) | SensorKind::Humidity(_), SensorSubtype::Dht22) => {
                Some(SensorFamily::Dht22)
            }
            (SensorKind::Motion(_), _) => Some(SensorFamily::Motion),
            _ => None,
        }
    }

    /// Polling period, `None` for event driven sensors.
    pub fn interval(&self) -> Option<u64> {
        match &self.kind {
            SensorKind::Temperature(state) => Some(state.interval),
            SensorKind::Humidity(state) => Some(state.interval),
            SensorKind::Motion(_) => None,
        }
    }

    pub fn uses_gpio(&self, gpio_uuid: &str) -> bool {
        self.gpios.iter().any(|gpio| gpio.gpio_uuid == gpio_uuid)
    }

    pub fn temperature(&self) -> Option<&TemperatureState> {
        match &self.kind {
            SensorKind::Temperature(state) => Some(state),
            _ => None,
        }
    }

    pub fn temperature_mut(&mut self) -> Option<&mut TemperatureState> {
        match &mut self.kind {
            SensorKind::Temperature(state) => Some(state),
            _ => None,
        }
    }

    pub fn humidity_mut(&mut self) -> Option<&mut HumidityState> {
        match &mut self.kind {
            SensorKind::Humidity(state) => Some(state),
            _ => None,
        }
    }

    pub fn motion_state(&self) -> Option<&MotionState> {
        match &self.kind {
            SensorKind::Motion(state) => Some(state),
            _ => None,
        }
    }

    pub fn motion_mut(&mut self) -> Option<&mut MotionState> {
        match &mut self.kind {
            SensorKind::Motion(state) => Some(state),
            _ => None,
        }
    }

    /// Change the polling period (no-op for motion).
    pub fn set_interval(&mut self, interval: u64) {
        match &mut self.kind {
            SensorKind::Temperature(state) => state.interval = interval,
            SensorKind::Humidity(state) => state.interval = interval,
            SensorKind::Motion(_) => {}
        }
    }
}

/// Current time in epoch seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) fn test_gpio(gpio: &str, gpio_uuid: &str, pin: u32) -> GpioAssignment {
    GpioAssignment {
        gpio: gpio.to_string(),
        gpio_uuid: gpio_uuid.to_string(),
        pin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        let gpio = test_gpio("GPIO4", "g-1", 7);
        let onewire = SensorRecord::onewire(
            "outdoor",
            gpio.clone(),
            "28-0000",
            "/sys/bus/w1/devices/28-0000/w1_slave",
            60,
            0.0,
            OffsetUnit::Celsius,
        );
        assert_eq!(onewire.family(), Some(SensorFamily::Onewire));
        assert_eq!(onewire.sensor_type(), SensorType::Temperature);

        let humidity = SensorRecord::dht22_humidity("attic", gpio.clone(), 30);
        assert_eq!(humidity.family(), Some(SensorFamily::Dht22));
        assert_eq!(humidity.interval(), Some(30));

        let motion = SensorRecord::motion("hall", gpio, false);
        assert_eq!(motion.family(), Some(SensorFamily::Motion));
        assert_eq!(motion.interval(), None);
    }

    #[test]
    fn test_unsupported_pair_has_no_family() {
        let mut record = SensorRecord::dht22_humidity("attic", test_gpio("GPIO17", "g-2", 11), 30);
        record.subtype = SensorSubtype::Onewire;
        assert_eq!(record.family(), None);
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = SensorRecord::dht22_temperature(
            "attic",
            test_gpio("GPIO17", "g-2", 11),
            30,
            2.0,
            OffsetUnit::Celsius,
        );
        record.uuid = "s-1".to_string();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "temperature");
        assert_eq!(value["subtype"], "dht22");
        assert_eq!(value["offset_unit"], "celsius");
        assert_eq!(value["gpios"][0]["gpio"], "GPIO17");
        assert!(value["celsius"].is_null());
        assert!(value.get("path").is_none());

        let back: SensorRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_set_offset_recomputes() {
        let mut state = TemperatureState::new(60, 0.0, OffsetUnit::Celsius);
        assert_eq!(state.offset_fahrenheit, 0.0);
        state.set_offset(1.0, OffsetUnit::Celsius);
        assert_eq!(state.offset_celsius, 1.0);
        assert!((state.offset_fahrenheit - 33.8).abs() < 1e-9);
    }
}
