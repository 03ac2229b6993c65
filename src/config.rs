use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut vars = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let mut value = value.trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            vars.push((key.trim(), value));
        }
    }
    vars
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    pub readers: ReadersConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Root of every topic used by the daemon
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub catalog_path: PathBuf,
    pub ledger_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadersConfig {
    /// Sysfs directory of the 1-wire bus
    pub onewire_path: PathBuf,
    /// DHT22 reader command, `{pin}` is replaced by the physical pin
    pub dht22_command: String,
    pub dht22_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Line name to physical header pin
    pub gpios: BTreeMap<String, u32>,
    /// Lines held by a kernel driver (1-wire overlay, ...)
    pub driver_reserved: BTreeSet<String>,
}

/// Raspberry Pi 40-pin header, BCM line to physical pin.
const RASPI_GPIOS: [(&str, u32); 28] = [
    ("GPIO0", 27),
    ("GPIO1", 28),
    ("GPIO2", 3),
    ("GPIO3", 5),
    ("GPIO4", 7),
    ("GPIO5", 29),
    ("GPIO6", 31),
    ("GPIO7", 26),
    ("GPIO8", 24),
    ("GPIO9", 21),
    ("GPIO10", 19),
    ("GPIO11", 23),
    ("GPIO12", 32),
    ("GPIO13", 33),
    ("GPIO14", 8),
    ("GPIO15", 10),
    ("GPIO16", 36),
    ("GPIO17", 11),
    ("GPIO18", 12),
    ("GPIO19", 35),
    ("GPIO20", 38),
    ("GPIO21", 40),
    ("GPIO22", 15),
    ("GPIO23", 16),
    ("GPIO24", 18),
    ("GPIO25", 22),
    ("GPIO26", 37),
    ("GPIO27", 13),
];

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            gpios: RASPI_GPIOS
                .iter()
                .map(|(gpio, pin)| (gpio.to_string(), *pin))
                .collect(),
            driver_reserved: BTreeSet::new(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpio-sensors")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            mqtt: MqttConfig {
                broker_host: "10.0.0.2".to_string(),
                broker_port: 1883,
                client_id: "gpio-sensors".to_string(),
                username: None,
                password: None,
                topic_prefix: "gpio-sensors".to_string(),
            },
            storage: StorageConfig {
                catalog_path: data_dir.join("sensors.json"),
                ledger_path: data_dir.join("gpios.json"),
            },
            readers: ReadersConfig {
                onewire_path: PathBuf::from("/sys/bus/w1/devices/"),
                dht22_command: "/usr/local/bin/dht22 {pin}".to_string(),
                dht22_timeout_secs: 11,
            },
            board: BoardConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Ok(prefix) = std::env::var("MQTT_TOPIC_PREFIX") {
            config.mqtt.topic_prefix = prefix.trim_end_matches('/').to_string();
        }

        // Storage
        if let Ok(path) = std::env::var("SENSORS_CATALOG_PATH") {
            config.storage.catalog_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SENSORS_LEDGER_PATH") {
            config.storage.ledger_path = PathBuf::from(path);
        }

        // Readers
        if let Ok(path) = std::env::var("ONEWIRE_PATH") {
            config.readers.onewire_path = PathBuf::from(path);
        }
        if let Ok(command) = std::env::var("DHT22_COMMAND") {
            config.readers.dht22_command = command;
        }
        if let Ok(timeout) = std::env::var("DHT22_TIMEOUT_SECS")
            && let Ok(t) = timeout.parse()
        {
            config.readers.dht22_timeout_secs = t;
        }

        // Board
        if let Ok(gpios) = std::env::var("DRIVER_RESERVED_GPIOS") {
            config.board.driver_reserved = parse_gpio_list(&gpios);
        }

        config
    }
}

fn parse_gpio_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|gpio| !gpio.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv() {
        let vars = parse_dotenv(
            "# broker\nMQTT_BROKER_HOST = 10.0.0.9\n\nDHT22_COMMAND=\"/opt/dht22 --pin {pin}\"\nbroken line\n",
        );
        assert_eq!(
            vars,
            vec![
                ("MQTT_BROKER_HOST", "10.0.0.9"),
                ("DHT22_COMMAND", "/opt/dht22 --pin {pin}"),
            ]
        );
    }

    #[test]
    fn test_default_board() {
        let board = BoardConfig::default();
        assert_eq!(board.gpios.len(), 28);
        assert_eq!(board.gpios.get("GPIO4"), Some(&7));
        assert_eq!(board.gpios.get("GPIO27"), Some(&13));
        assert!(board.driver_reserved.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.readers.dht22_timeout_secs, 11);
        assert!(config.storage.catalog_path.ends_with("gpio-sensors/sensors.json"));
        assert_eq!(config.mqtt.topic_prefix, "gpio-sensors");
    }

    #[test]
    fn test_parse_gpio_list() {
        let gpios = parse_gpio_list(" GPIO4, ,GPIO17 ");
        assert_eq!(
            gpios.into_iter().collect::<Vec<_>>(),
            vec!["GPIO17".to_string(), "GPIO4".to_string()]
        );
    }
}
