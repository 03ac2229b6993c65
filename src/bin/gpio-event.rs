//! Development tool publishing a simulated gpio line event.
//!
//! Exercises motion sensors without hardware.
//!
//! Usage:
//!   cargo run --bin gpio-event -- on <gpio-uuid>
//!   cargo run --bin gpio-event -- off <gpio-uuid> --duration 12.5

use clap::{Parser, ValueEnum};
use gpio_sensors::config::{Config, load_dotenv};
use gpio_sensors::events::{Edge, GpioEvent};
use gpio_sensors::input::mqtt::{MqttClient, Topics};
use log::{error, info};
use rumqttc::{Event, Packet};
use std::time::Duration;

#[derive(Clone, Copy, ValueEnum)]
enum EdgeArg {
    /// Rising edge (motion detected)
    On,
    /// Falling edge (motion ended)
    Off,
}

#[derive(Parser)]
#[command(name = "gpio-event")]
#[command(about = "Publish a simulated gpio line event")]
struct Cli {
    /// Edge to simulate
    edge: EdgeArg,

    /// Allocation uuid of the line
    gpio_uuid: String,

    /// Seconds the line stayed high (falling edges)
    #[arg(long)]
    duration: Option<f64>,

    /// Flag the event as a startup replay
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() {
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    // Must not take over the daemon's session
    config.mqtt.client_id = format!("{}-event", config.mqtt.client_id);
    let topics = Topics::new(config.mqtt.topic_prefix.clone());

    let mut event = match cli.edge {
        EdgeArg::On => GpioEvent::rising(&cli.gpio_uuid),
        EdgeArg::Off => GpioEvent::falling(&cli.gpio_uuid, cli.duration),
    };
    event.params.init = cli.init;
    let payload = match serde_json::to_string(&event) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode event: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let mqtt_client = MqttClient::new(&config.mqtt);
    let topic = topics.gpio_events();
    if let Err(e) = mqtt_client.publish(&topic, &payload).await {
        error!("Failed to queue event: {:?}", e);
        std::process::exit(1);
    }
    let mut event_loop = mqtt_client.into_event_loop();

    // Drive the connection until the broker acknowledges the publish
    let acked = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return true,
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {:?}", e);
                    return false;
                }
            }
        }
    })
    .await;

    match acked {
        Ok(true) => {
            let edge = match event.event {
                Edge::Rising => "rising",
                Edge::Falling => "falling",
            };
            info!("Published {} edge to {}: {}", edge, topic, payload);
        }
        Ok(false) => std::process::exit(1),
        Err(_) => {
            error!("No acknowledgement after 10 seconds");
            std::process::exit(1);
        }
    }
}
