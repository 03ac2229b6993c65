//! Reading backends.
//!
//! A backend turns a sensor record into one measurement. Failures that are
//! expected on real hardware (missing probe file, bad conversion, command
//! timeout) are not errors: they come back as [`ReadOutcome::NoReading`] and
//! the tick simply publishes nothing.

pub mod dht22;
pub mod onewire;

pub use dht22::Dht22Reader;
pub use onewire::OnewireReader;

use crate::config::ReadersConfig;
use crate::sensors::SensorRecord;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Values produced by one read. Absent fields were not measured or invalid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub celsius: Option<f64>,
    pub fahrenheit: Option<f64>,
    pub humidity: Option<f64>,
}

impl Reading {
    /// Temperature reading with Fahrenheit derived from Celsius.
    pub fn from_celsius(celsius: f64) -> Self {
        Self {
            celsius: Some(celsius),
            fahrenheit: Some(celsius * 9.0 / 5.0 + 32.0),
            humidity: None,
        }
    }

    /// Both temperature scales are present.
    pub fn temperature(&self) -> Option<(f64, f64)> {
        self.celsius.zip(self.fahrenheit)
    }

    pub fn is_empty(&self) -> bool {
        self.celsius.is_none() && self.fahrenheit.is_none() && self.humidity.is_none()
    }

    /// Add precomputed offsets to the temperature values.
    pub fn with_offsets(mut self, offset_celsius: f64, offset_fahrenheit: f64) -> Self {
        self.celsius = self.celsius.map(|c| c + offset_celsius);
        self.fahrenheit = self.fahrenheit.map(|f| f + offset_fahrenheit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Value(Reading),
    /// No valid value this time; the reason is for logs only
    NoReading(String),
}

impl ReadOutcome {
    /// Reading to apply, empty when nothing valid was read.
    pub fn into_reading(self) -> Reading {
        match self {
            ReadOutcome::Value(reading) => reading,
            ReadOutcome::NoReading(_) => Reading::default(),
        }
    }
}

#[async_trait]
pub trait ReadingBackend: Send + Sync {
    async fn read(&self, sensor: &SensorRecord) -> ReadOutcome;
}

/// The backend bound to each polled family.
#[derive(Clone)]
pub struct ReadingBackends {
    pub onewire: Arc<dyn ReadingBackend>,
    pub dht22: Arc<dyn ReadingBackend>,
}

impl ReadingBackends {
    pub fn from_config(config: &ReadersConfig) -> Self {
        Self {
            onewire: Arc::new(OnewireReader::new(config.onewire_path.clone())),
            dht22: Arc::new(Dht22Reader::new(
                config.dht22_command.clone(),
                Duration::from_secs(config.dht22_timeout_secs),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_celsius() {
        let reading = Reading::from_celsius(25.0);
        assert_eq!(reading.temperature(), Some((25.0, 77.0)));
        assert!(reading.humidity.is_none());
        assert!(!reading.is_empty());
    }

    #[test]
    fn test_offsets_leave_missing_values_missing() {
        let reading = Reading {
            humidity: Some(40.0),
            ..Default::default()
        }
        .with_offsets(1.0, 33.8);
        assert!(reading.celsius.is_none());
        assert_eq!(reading.humidity, Some(40.0));

        let reading = Reading::from_celsius(20.0).with_offsets(1.0, 33.8);
        assert_eq!(reading.celsius, Some(21.0));
        assert!((reading.fahrenheit.unwrap() - 101.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_reading_is_empty() {
        assert!(
            ReadOutcome::NoReading("timeout".into())
                .into_reading()
                .is_empty()
        );
    }
}
