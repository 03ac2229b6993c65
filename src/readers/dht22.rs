//! DHT22 temperature/humidity probe read through an external binary.
//!
//! The binary is invoked with the physical pin and prints one JSON line:
//! `{"error": "", "celsius": 21.5, "fahrenheit": 70.7, "humidity": 45.0}`.
//! It gives up on the device after ~10 seconds on its own, so the process
//! is killed if it runs past a slightly longer ceiling.

use super::{ReadOutcome, Reading, ReadingBackend};
use crate::sensors::SensorRecord;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;

/// Placeholder replaced by the physical pin in the command template.
pub const PIN_PLACEHOLDER: &str = "{pin}";

#[derive(Debug, Deserialize)]
struct Dht22Output {
    #[serde(default)]
    error: String,
    #[serde(default)]
    celsius: Option<f64>,
    #[serde(default)]
    fahrenheit: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
}

/// Parse the first stdout line of the binary.
pub fn parse_output(stdout: &str) -> Result<Reading, String> {
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or("empty output")?;
    let output: Dht22Output =
        serde_json::from_str(line).map_err(|e| format!("invalid output: {}", e))?;
    if !output.error.is_empty() {
        return Err(output.error);
    }
    Ok(Reading {
        celsius: output.celsius,
        fahrenheit: output.fahrenheit,
        humidity: output.humidity,
    })
}

pub struct Dht22Reader {
    command: String,
    timeout: Duration,
}

impl Dht22Reader {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn command_for(&self, pin: u32) -> String {
        self.command.replace(PIN_PLACEHOLDER, &pin.to_string())
    }

    async fn run(&self, pin: u32) -> Result<Reading, String> {
        let cmd = self.command_for(pin);
        debug!("Read DHT22 sensor values from command \"{}\"", cmd);

        let output = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to run \"{}\": {}", cmd, e)),
            Err(_) => return Err(format!("killed after {:?}", self.timeout)),
        };
        if !output.status.success() {
            return Err(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ReadingBackend for Dht22Reader {
    async fn read(&self, sensor: &SensorRecord) -> ReadOutcome {
        let [gpio] = sensor.gpios.as_slice() else {
            warn!(
                "Unable to read DHT22 sensor {} because gpios field is misconfigured {:?}",
                sensor.name, sensor.gpios
            );
            return ReadOutcome::NoReading("gpios misconfigured".to_string());
        };

        match self.run(gpio.pin).await {
            Ok(reading) => ReadOutcome::Value(reading),
            Err(reason) => {
                warn!("Unable to read DHT22 sensor {}: {}", sensor.name, reason);
                ReadOutcome::NoReading(reason)
            }
        }
    }
}
