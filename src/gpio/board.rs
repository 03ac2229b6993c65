use super::{GpioAttributes, GpioDevice, GpioLedger, GpioMode};
use crate::error::{Result, SensorsError};
use crate::persist::JsonFile;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LedgerState {
    devices: BTreeMap<String, GpioDevice>,
}

impl LedgerState {
    fn device_on(&self, gpio: &str) -> Option<&GpioDevice> {
        self.devices.values().find(|device| device.gpio == gpio)
    }
}

/// Line ledger for one board, kept in process.
pub struct BoardLedger {
    lines: BTreeMap<String, u32>,
    driver_reserved: BTreeSet<String>,
    file: Option<JsonFile>,
    state: RwLock<LedgerState>,
}

impl BoardLedger {
    /// Ledger over the given line name to physical pin table.
    pub fn new(lines: BTreeMap<String, u32>) -> Self {
        Self {
            lines,
            driver_reserved: BTreeSet::new(),
            file: None,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Mark lines as held by a kernel driver; they are never released.
    pub fn with_driver_reserved<I, S>(mut self, gpios: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.driver_reserved = gpios.into_iter().map(Into::into).collect();
        self
    }

    /// Mirror allocations to a JSON file, loading existing ones.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        let file = JsonFile::new(path);
        let state: LedgerState = file.load();
        info!("Gpio ledger holds {} allocation(s)", state.devices.len());
        *self.state.write() = state;
        self.file = Some(file);
        self
    }

    fn pin(&self, gpio: &str) -> Result<u32> {
        self.lines.get(gpio).copied().ok_or_else(|| {
            SensorsError::Ledger(format!("Gpio \"{}\" does not exist on this board", gpio))
        })
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        match &self.file {
            Some(file) => file
                .save(state)
                .map_err(|e| SensorsError::Ledger(format!("failed to save ledger: {}", e))),
            None => Ok(()),
        }
    }

    fn insert(&self, state: &mut LedgerState, device: GpioDevice) -> Result<GpioDevice> {
        state.devices.insert(device.uuid.clone(), device.clone());
        if let Err(e) = self.persist(state) {
            state.devices.remove(&device.uuid);
            return Err(e);
        }
        debug!("Gpio {} assigned to {}", device.gpio, device.name);
        Ok(device)
    }
}

#[async_trait]
impl GpioLedger for BoardLedger {
    async fn reserve(&self, name: &str, gpio: &str, usage: &str) -> Result<GpioDevice> {
        let pin = self.pin(gpio)?;
        let mut state = self.state.write();
        if let Some(existing) = state.device_on(gpio) {
            if existing.usage.as_deref() == Some(usage) {
                return Ok(existing.clone());
            }
            return Err(SensorsError::Ledger(format!(
                "Gpio \"{}\" is already used by {}",
                gpio, existing.name
            )));
        }

        let device = GpioDevice {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            gpio: gpio.to_string(),
            pin,
            mode: GpioMode::Reserved,
            inverted: false,
            usage: Some(usage.to_string()),
        };
        self.insert(&mut state, device)
    }

    async fn allocate(
        &self,
        name: &str,
        gpio: &str,
        mode: GpioMode,
        inverted: bool,
    ) -> Result<GpioDevice> {
        let pin = self.pin(gpio)?;
        let mut state = self.state.write();
        if let Some(existing) = state.device_on(gpio) {
            return Err(SensorsError::Ledger(format!(
                "Gpio \"{}\" is already used by {}",
                gpio, existing.name
            )));
        }

        let device = GpioDevice {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            gpio: gpio.to_string(),
            pin,
            mode,
            inverted,
            usage: None,
        };
        self.insert(&mut state, device)
    }

    async fn release(&self, gpio_uuid: &str) -> Result<()> {
        let mut state = self.state.write();
        let Some(removed) = state.devices.remove(gpio_uuid) else {
            return Err(SensorsError::UnknownGpio(gpio_uuid.to_string()));
        };
        if let Err(e) = self.persist(&state) {
            state.devices.insert(removed.uuid.clone(), removed);
            return Err(e);
        }
        debug!("Gpio {} released", removed.gpio);
        Ok(())
    }

    async fn is_reserved(&self, gpio_uuid: &str) -> Result<bool> {
        let state = self.state.read();
        let device = state
            .devices
            .get(gpio_uuid)
            .ok_or_else(|| SensorsError::UnknownGpio(gpio_uuid.to_string()))?;
        Ok(self.driver_reserved.contains(&device.gpio))
    }

    async fn reconfigure(
        &self,
        gpio_uuid: &str,
        attributes: &GpioAttributes,
    ) -> Result<GpioDevice> {
        let mut state = self.state.write();
        let device = state
            .devices
            .get_mut(gpio_uuid)
            .ok_or_else(|| SensorsError::UnknownGpio(gpio_uuid.to_string()))?;
        let previous = device.clone();
        device.name = attributes.name.clone();
        device.inverted = attributes.inverted;
        let updated = device.clone();

        if let Err(e) = self.persist(&state) {
            state.devices.insert(previous.uuid.clone(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    async fn assigned_gpios(&self) -> Result<BTreeSet<String>> {
        let state = self.state.read();
        Ok(state
            .devices
            .values()
            .map(|device| device.gpio.clone())
            .chain(self.driver_reserved.iter().cloned())
            .collect())
    }

    async fn available_gpios(&self) -> Result<BTreeMap<String, u32>> {
        Ok(self.lines.clone())
    }
}
