//! GPIO sensors daemon.
//!
//! Usage:
//!   cargo run --bin gpio-sensors
//!   cargo run --bin gpio-sensors -- --catalog ./sensors.json -v

use clap::Parser;
use gpio_sensors::catalog::SensorStore;
use gpio_sensors::config::{Config, load_dotenv};
use gpio_sensors::engine::Sensors;
use gpio_sensors::gpio::BoardLedger;
use gpio_sensors::input::mqtt::{MqttClient, MqttIntegration, MqttPublisher, Topics};
use gpio_sensors::readers::ReadingBackends;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "gpio-sensors")]
#[command(about = "Poll GPIO attached sensors and publish their values over MQTT")]
struct Cli {
    /// Sensor catalog file
    #[arg(long, env = "SENSORS_CATALOG_PATH")]
    catalog: Option<PathBuf>,

    /// Gpio ledger file
    #[arg(long, env = "SENSORS_LEDGER_PATH")]
    ledger: Option<PathBuf>,

    /// Log debug messages (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logger(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    load_dotenv();

    let cli = Cli::parse();
    init_logger(cli.verbose);
    info!("Starting GPIO sensors");

    // Load configuration
    let mut config = Config::from_env();
    if let Some(path) = cli.catalog {
        config.storage.catalog_path = path;
    }
    if let Some(path) = cli.ledger {
        config.storage.ledger_path = path;
    }
    info!("Configuration loaded:");
    info!(
        "  MQTT broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Topic prefix: {}", config.mqtt.topic_prefix);
    info!("  Catalog: {}", config.storage.catalog_path.display());
    info!("  Ledger: {}", config.storage.ledger_path.display());
    info!("  DHT22 command: {}", config.readers.dht22_command);

    let catalog = Arc::new(SensorStore::open(&config.storage.catalog_path));
    let ledger = Arc::new(
        BoardLedger::new(config.board.gpios.clone())
            .with_driver_reserved(config.board.driver_reserved.iter().cloned())
            .with_persistence(&config.storage.ledger_path),
    );

    let topics = Topics::new(config.mqtt.topic_prefix.clone());
    let mqtt_client = MqttClient::new(&config.mqtt);
    let publisher = Arc::new(MqttPublisher::new(mqtt_client.client(), topics.clone()));

    let sensors = Arc::new(Sensors::new(
        ledger,
        catalog,
        ReadingBackends::from_config(&config.readers),
        publisher,
    ));
    sensors.configure();

    let integration = MqttIntegration::new(mqtt_client, topics, sensors.clone()).start();

    info!("GPIO sensors running, press Ctrl+C to exit");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    integration.abort();
    sensors.shutdown().await;

    info!("GPIO sensors stopped");
}
