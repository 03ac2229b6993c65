//! Sensor events published on the broker.

use super::Topics;
use crate::events::{EventPublisher, SensorEvent};
use log::{debug, warn};
use rumqttc::{AsyncClient, QoS};

/// Fire-and-forget publisher; events are queued on the client without waiting.
pub struct MqttPublisher {
    client: AsyncClient,
    topics: Topics,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }
}

impl EventPublisher for MqttPublisher {
    fn publish(&self, event: &SensorEvent) {
        let topic = self.topics.sensor_event(event);
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[MQTT] Failed to encode {}: {}", event.name(), e);
                return;
            }
        };

        debug!(
            "[MQTT] Publishing {} of {} to {}",
            event.name(),
            event.device_id(),
            topic
        );
        if let Err(e) = self
            .client
            .try_publish(&topic, QoS::AtLeastOnce, false, payload)
        {
            warn!(
                "[MQTT] Failed to publish {} for {}: {:?}",
                event.name(),
                event.sensor(),
                e
            );
        }
    }
}
