//! DS18B20 probe on the 1-wire bus.
//!
//! The kernel exposes each probe as a `w1_slave` file:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The `t=` value is in millidegrees Celsius.

use super::{ReadOutcome, Reading, ReadingBackend};
use crate::sensors::SensorRecord;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::PathBuf;

/// Raw values a DS18B20 reports when a conversion failed.
pub const SENTINEL_VALUES: [&str; 2] = ["85000", "-62"];

/// Extract the temperature in Celsius from a slave file.
pub fn parse_slave_file(content: &str) -> Result<f64, String> {
    let mut lines = content.lines();
    let crc_line = lines.next().ok_or("empty slave file")?;
    if crc_line.trim_end().ends_with("NO") {
        return Err("crc check failed".to_string());
    }

    let data_line = lines.next().ok_or("no temperature line")?;
    let pos = data_line.find("t=").ok_or("no temperature found")?;
    let raw = data_line[pos + 2..].trim();
    if SENTINEL_VALUES.contains(&raw) {
        return Err(format!("invalid temperature \"{}\"", raw));
    }

    raw.parse::<f64>()
        .map(|millidegrees| millidegrees / 1000.0)
        .map_err(|e| format!("invalid temperature \"{}\": {}", raw, e))
}

/// Reads the slave file stored in the record's `path`.
///
/// Relative paths are resolved against the bus directory.
pub struct OnewireReader {
    bus: PathBuf,
}

impl OnewireReader {
    pub fn new(bus: impl Into<PathBuf>) -> Self {
        Self { bus: bus.into() }
    }

    pub fn slave_file(&self, path: &str) -> PathBuf {
        self.bus.join(path)
    }
}

#[async_trait]
impl ReadingBackend for OnewireReader {
    async fn read(&self, sensor: &SensorRecord) -> ReadOutcome {
        let Some(state) = sensor.temperature() else {
            return ReadOutcome::NoReading(format!("{} is not a temperature sensor", sensor.name));
        };
        let Some(path) = state.path.as_deref() else {
            return ReadOutcome::NoReading(format!("{} has no 1-wire path", sensor.name));
        };

        let file = self.slave_file(path);
        let content = match tokio::fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Unable to read 1-wire device file {:?}: {}", file, e);
                return ReadOutcome::NoReading(e.to_string());
            }
        };

        match parse_slave_file(&content) {
            Ok(celsius) => {
                let reading = Reading::from_celsius(celsius)
                    .with_offsets(state.offset_celsius, state.offset_fahrenheit);
                debug!(
                    "Read temperature {:?}°C - {:?}°F from {}",
                    reading.celsius, reading.fahrenheit, file.display()
                );
                ReadOutcome::Value(reading)
            }
            Err(reason) => {
                warn!("Unable to read 1-wire device file {:?}: {}", file, reason);
                ReadOutcome::NoReading(reason)
            }
        }
    }
}
