//! MQTT Integration orchestrator.
//!
//! Connects the sensor engine to the broker without exposing MQTT internals
//! to main.rs: line events are routed to the motion state machine and
//! control commands are answered on the reply topic.

use super::Topics;
use super::client::{MqttClient, MqttMessage};
use crate::engine::Sensors;
use crate::engine::commands::{dispatch, encode_reply};
use crate::events::GpioEvent;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// MQTT Integration orchestrator.
pub struct MqttIntegration {
    mqtt_client: MqttClient,
    topics: Topics,
    sensors: Arc<Sensors>,
}

impl MqttIntegration {
    pub fn new(mqtt_client: MqttClient, topics: Topics, sensors: Arc<Sensors>) -> Self {
        Self {
            mqtt_client,
            topics,
            sensors,
        }
    }

    /// Start the MQTT integration.
    ///
    /// Spawns a background task that waits for the broker connection,
    /// subscribes and routes messages. Returns a JoinHandle that can be
    /// used to abort the task on shutdown.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let Self {
            mqtt_client,
            topics,
            sensors,
        } = self;
        let client = mqtt_client.client();

        // Channel for MQTT messages
        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);

        // Channel to signal when connected
        let (connected_tx, connected_rx) = oneshot::channel();

        // Start MQTT event loop FIRST (so it can establish connection)
        let mqtt_loop = tokio::spawn(async move {
            mqtt_client.run(msg_tx, Some(connected_tx)).await;
        });

        // Wait for connection (with timeout)
        match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => {
                info!("[MQTT] Connection established, subscribing to topics");
            }
            Ok(Err(_)) => {
                warn!("[MQTT] Connection signal channel dropped");
                return;
            }
            Err(_) => {
                warn!("[MQTT] Connection timeout after 10 seconds");
                mqtt_loop.abort();
                return;
            }
        }

        for topic in [topics.gpio_events(), topics.commands()] {
            if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e);
            }
        }

        info!(
            "[MQTT] Integration started with {} sensor(s)",
            sensors.sensors().len()
        );

        // Process incoming messages
        while let Some(msg) = msg_rx.recv().await {
            if msg.topic == topics.gpio_events() {
                handle_gpio_event(&sensors, &msg.payload);
            } else if msg.topic == topics.commands() {
                spawn_command(sensors.clone(), client.clone(), topics.command_reply(), msg);
            } else {
                debug!("[MQTT] Ignoring message on {}", msg.topic);
            }
        }

        mqtt_loop.abort();
    }
}

fn handle_gpio_event(sensors: &Sensors, payload: &str) {
    match serde_json::from_str::<GpioEvent>(payload) {
        Ok(event) => {
            sensors.handle_gpio_event(&event);
        }
        Err(e) => {
            debug!("[MQTT] Ignoring gpio event {}: {}", payload, e);
        }
    }
}

/// Run a command on its own task so a slow add never holds up line events.
fn spawn_command(sensors: Arc<Sensors>, client: AsyncClient, reply_topic: String, msg: MqttMessage) {
    tokio::spawn(async move {
        let reply = dispatch(&sensors, &msg.payload).await;
        info!(
            "[MQTT] Command {} {}",
            reply.command,
            if reply.ok { "succeeded" } else { "failed" }
        );
        if let Err(e) = client
            .publish(&reply_topic, QoS::AtLeastOnce, false, encode_reply(&reply))
            .await
        {
            warn!("[MQTT] Failed to publish reply to {}: {:?}", reply_topic, e);
        }
    });
}
