//! Control commands received from the bus.
//!
//! A request is `{"command": "...", "params": {...}}`, the reply carries the
//! command name, an `ok` flag and either `data` or `error`.

use super::Sensors;
use super::params::{
    DeleteParams, Dht22Params, Dht22Update, MotionParams, MotionUpdate, OnewireParams,
    OnewireUpdate,
};
use crate::error::{Result, SensorsError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "snake_case")]
pub enum Command {
    AddTemperatureOnewire(OnewireParams),
    UpdateTemperatureOnewire(OnewireUpdate),
    AddMotionGeneric(MotionParams),
    UpdateMotionGeneric(MotionUpdate),
    AddDht22(Dht22Params),
    UpdateDht22(Dht22Update),
    DeleteSensor(DeleteParams),
    GetSensors,
    GetModuleConfig,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddTemperatureOnewire(_) => "add_temperature_onewire",
            Command::UpdateTemperatureOnewire(_) => "update_temperature_onewire",
            Command::AddMotionGeneric(_) => "add_motion_generic",
            Command::UpdateMotionGeneric(_) => "update_motion_generic",
            Command::AddDht22(_) => "add_dht22",
            Command::UpdateDht22(_) => "update_dht22",
            Command::DeleteSensor(_) => "delete_sensor",
            Command::GetSensors => "get_sensors",
            Command::GetModuleConfig => "get_module_config",
        }
    }

    pub async fn execute(self, sensors: &Sensors) -> Result<Value> {
        let data = match self {
            Command::AddTemperatureOnewire(params) => {
                serde_json::to_value(sensors.add_temperature_onewire(params).await?)?
            }
            Command::UpdateTemperatureOnewire(params) => {
                serde_json::to_value(sensors.update_temperature_onewire(params).await?)?
            }
            Command::AddMotionGeneric(params) => {
                serde_json::to_value(sensors.add_motion_generic(params).await?)?
            }
            Command::UpdateMotionGeneric(params) => {
                serde_json::to_value(sensors.update_motion_generic(params).await?)?
            }
            Command::AddDht22(params) => serde_json::to_value(sensors.add_dht22(params).await?)?,
            Command::UpdateDht22(params) => {
                serde_json::to_value(sensors.update_dht22(params).await?)?
            }
            Command::DeleteSensor(params) => {
                sensors.delete_sensor(params.uuid()?).await?;
                Value::Null
            }
            Command::GetSensors => serde_json::to_value(sensors.sensors())?,
            Command::GetModuleConfig => serde_json::to_value(sensors.module_config().await?)?,
        };
        Ok(data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Offending parameter, when the error is about one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

impl CommandReply {
    fn success(command: &str, data: Value) -> Self {
        Self {
            command: command.to_string(),
            ok: true,
            data: Some(data),
            error: None,
            field: None,
        }
    }

    fn failure(command: &str, error: &SensorsError) -> Self {
        Self {
            command: command.to_string(),
            ok: false,
            data: None,
            error: Some(error.to_string()),
            field: error.field(),
        }
    }
}

/// Decode, run and answer one command payload.
pub async fn dispatch(sensors: &Sensors, payload: &str) -> CommandReply {
    let command: Command = match serde_json::from_str(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!("Invalid command payload: {}", e);
            let command = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|value| value.get("command")?.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            return CommandReply::failure(&command, &SensorsError::SerdeJsonError(e));
        }
    };

    let name = command.name();
    debug!("Running command {}", name);
    match command.execute(sensors).await {
        Ok(data) => CommandReply::success(name, data),
        Err(e) => {
            warn!("Command {} failed: {}", name, e);
            CommandReply::failure(name, &e)
        }
    }
}

/// Reply payload, falling back to a bare error when it cannot be encoded.
pub fn encode_reply(reply: &CommandReply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        json!({"command": reply.command, "ok": false, "error": e.to_string()}).to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SensorStore;
    use crate::testing::{RecordingPublisher, ScriptedBackend, backends, pi_ledger};
    use std::sync::Arc;

    fn sensors() -> Sensors {
        Sensors::new(
            pi_ledger(),
            Arc::new(SensorStore::in_memory()),
            backends(ScriptedBackend::failing(), ScriptedBackend::failing()),
            RecordingPublisher::new(),
        )
    }

    #[test]
    fn test_parse_commands() {
        let command: Command = serde_json::from_str(
            r#"{"command": "add_dht22", "params": {"name": "attic", "gpio": "GPIO17", "interval": 30, "offset": 0, "offset_unit": "celsius"}}"#,
        )
        .unwrap();
        assert_eq!(command.name(), "add_dht22");

        let command: Command = serde_json::from_str(r#"{"command": "get_sensors"}"#).unwrap();
        assert!(matches!(command, Command::GetSensors));
    }

    #[tokio::test]
    async fn test_dispatch_add_and_list() {
        let sensors = sensors();
        let reply = dispatch(
            &sensors,
            r#"{"command": "add_motion_generic", "params": {"name": "hall", "gpio": "GPIO18", "inverted": false}}"#,
        )
        .await;
        assert!(reply.ok, "{:?}", reply);
        let data = reply.data.unwrap();
        assert_eq!(data["name"], "hall");
        assert_eq!(data["type"], "motion");
        assert_eq!(data["subtype"], "generic");

        let reply = dispatch(&sensors, r#"{"command": "get_sensors"}"#).await;
        assert_eq!(reply.data.unwrap().as_array().unwrap().len(), 1);

        let reply = dispatch(&sensors, r#"{"command": "get_module_config"}"#).await;
        assert_eq!(reply.data.unwrap()["raspi_gpios"]["GPIO18"], 12);
    }

    #[tokio::test]
    async fn test_dispatch_reports_field() {
        let sensors = sensors();
        let reply = dispatch(
            &sensors,
            r#"{"command": "add_dht22", "params": {"name": "attic", "gpio": "GPIO17", "interval": 0, "offset": 0, "offset_unit": "celsius"}}"#,
        )
        .await;
        assert!(!reply.ok);
        assert_eq!(reply.command, "add_dht22");
        assert_eq!(reply.field, Some("interval"));

        let reply = dispatch(&sensors, r#"{"command": "delete_sensor", "params": {}}"#).await;
        assert_eq!(reply.field, Some("uuid"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_command() {
        let sensors = sensors();
        let reply = dispatch(&sensors, r#"{"command": "reboot"}"#).await;
        assert!(!reply.ok);
        assert_eq!(reply.command, "reboot");

        let reply = dispatch(&sensors, "not json").await;
        assert_eq!(reply.command, "unknown");
        assert!(encode_reply(&reply).contains("\"ok\":false"));
    }

    #[tokio::test]
    async fn test_onewire_add_with_failed_seed_read() {
        let sensors = sensors();
        let reply = dispatch(
            &sensors,
            r#"{"command": "add_temperature_onewire", "params": {"name": "outdoor", "device": "28-0000", "path": "/missing", "interval": 60, "offset": 0, "offset_unit": "celsius"}}"#,
        )
        .await;
        assert!(reply.ok, "{:?}", reply);
        let data = reply.data.unwrap();
        assert_eq!(data["gpios"][0]["gpio"], "GPIO4");
        assert!(data["celsius"].is_null());
        sensors.shutdown().await;
    }
}
