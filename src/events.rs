//! Events crossing the engine boundary.
//!
//! [`SensorEvent`] is published when a stored value changes; [`GpioEvent`]
//! is the inbound edge notification sent by the gpio service.

use crate::sensors::{SensorKind, SensorRecord};
use serde::{Deserialize, Serialize};

/// Value change announced on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorEvent {
    TemperatureUpdate {
        sensor: String,
        celsius: f64,
        fahrenheit: f64,
        lastupdate: i64,
        device_id: String,
    },
    HumidityUpdate {
        sensor: String,
        humidity: f64,
        lastupdate: i64,
        device_id: String,
    },
    MotionOn {
        sensor: String,
        lastupdate: i64,
        device_id: String,
    },
    MotionOff {
        sensor: String,
        duration: f64,
        lastupdate: i64,
        device_id: String,
    },
}

impl SensorEvent {
    /// Value update for a polled record, `None` while it has no value.
    pub fn value_update(record: &SensorRecord) -> Option<Self> {
        match &record.kind {
            SensorKind::Temperature(state) => Some(SensorEvent::TemperatureUpdate {
                sensor: record.name.clone(),
                celsius: state.celsius?,
                fahrenheit: state.fahrenheit?,
                lastupdate: record.lastupdate,
                device_id: record.uuid.clone(),
            }),
            SensorKind::Humidity(state) => Some(SensorEvent::HumidityUpdate {
                sensor: record.name.clone(),
                humidity: state.humidity?,
                lastupdate: record.lastupdate,
                device_id: record.uuid.clone(),
            }),
            SensorKind::Motion(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorEvent::TemperatureUpdate { .. } => "sensors.temperature.update",
            SensorEvent::HumidityUpdate { .. } => "sensors.humidity.update",
            SensorEvent::MotionOn { .. } => "sensors.motion.on",
            SensorEvent::MotionOff { .. } => "sensors.motion.off",
        }
    }

    pub fn sensor(&self) -> &str {
        match self {
            SensorEvent::TemperatureUpdate { sensor, .. }
            | SensorEvent::HumidityUpdate { sensor, .. }
            | SensorEvent::MotionOn { sensor, .. }
            | SensorEvent::MotionOff { sensor, .. } => sensor,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            SensorEvent::TemperatureUpdate { device_id, .. }
            | SensorEvent::HumidityUpdate { device_id, .. }
            | SensorEvent::MotionOn { device_id, .. }
            | SensorEvent::MotionOff { device_id, .. } => device_id,
        }
    }
}

/// Outbound side of the event bus. Publishing never fails the caller.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &SensorEvent);
}

/// Line level transition reported by the gpio service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    #[serde(rename = "gpios.gpio.on")]
    Rising,
    #[serde(rename = "gpios.gpio.off")]
    Falling,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpioEventParams {
    /// Sent while the gpio service replays line states at startup
    #[serde(default)]
    pub init: bool,
    /// Seconds the line stayed high (falling edges only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioEvent {
    pub event: Edge,
    /// Allocation identifier of the line
    pub device_id: String,
    #[serde(default)]
    pub params: GpioEventParams,
}

impl GpioEvent {
    pub fn rising(device_id: impl Into<String>) -> Self {
        Self {
            event: Edge::Rising,
            device_id: device_id.into(),
            params: GpioEventParams::default(),
        }
    }

    pub fn falling(device_id: impl Into<String>, duration: Option<f64>) -> Self {
        Self {
            event: Edge::Falling,
            device_id: device_id.into(),
            params: GpioEventParams {
                init: false,
                duration,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::test_gpio;
    use serde_json::json;

    #[test]
    fn test_value_update_needs_a_value() {
        let mut record = SensorRecord::dht22_humidity("attic", test_gpio("GPIO17", "g", 11), 30);
        record.uuid = "h-1".to_string();
        assert!(SensorEvent::value_update(&record).is_none());

        record.humidity_mut().unwrap().humidity = Some(45.0);
        let event = SensorEvent::value_update(&record).unwrap();
        assert_eq!(event.name(), "sensors.humidity.update");
        assert_eq!(event.device_id(), "h-1");
    }

    #[test]
    fn test_payload_shape() {
        let event = SensorEvent::MotionOff {
            sensor: "hall".to_string(),
            duration: 12.5,
            lastupdate: 1700000000,
            device_id: "m-1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "sensor": "hall",
                "duration": 12.5,
                "lastupdate": 1700000000,
                "device_id": "m-1",
            })
        );
    }

    #[test]
    fn test_gpio_event_from_json() {
        let event: GpioEvent = serde_json::from_value(json!({
            "event": "gpios.gpio.off",
            "device_id": "g-18",
            "params": {"init": false, "duration": 4.0},
        }))
        .unwrap();
        assert_eq!(event, GpioEvent::falling("g-18", Some(4.0)));

        let event: GpioEvent = serde_json::from_value(json!({
            "event": "gpios.gpio.on",
            "device_id": "g-18",
        }))
        .unwrap();
        assert_eq!(event.event, Edge::Rising);
        assert!(!event.params.init);

        assert!(
            serde_json::from_value::<GpioEvent>(json!({
                "event": "gpios.gpio.toggle",
                "device_id": "g-18",
            }))
            .is_err()
        );
    }
}
