//! MQTT transport for sensor events and control commands.
//!
//! Topics hang under one prefix:
//! - `<prefix>/sensors/<kind>/<action>`: outbound value changes
//! - `<prefix>/gpios/event`: inbound line edges from the gpio service
//! - `<prefix>/command` and `<prefix>/command/reply`: control requests

mod client;
mod integration;
mod publisher;

pub use client::{MqttClient, MqttMessage};
pub use integration::MqttIntegration;
pub use publisher::MqttPublisher;

use crate::events::SensorEvent;

/// Topic names derived from the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn sensor_event(&self, event: &SensorEvent) -> String {
        format!("{}/{}", self.prefix, event.name().replace('.', "/"))
    }

    pub fn gpio_events(&self) -> String {
        format!("{}/gpios/event", self.prefix)
    }

    pub fn commands(&self) -> String {
        format!("{}/command", self.prefix)
    }

    pub fn command_reply(&self) -> String {
        format!("{}/command/reply", self.prefix)
    }
}
