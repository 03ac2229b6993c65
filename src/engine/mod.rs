//! Sensor lifecycle engine.
//!
//! [`Sensors`] ties the gpio ledger, the catalog, the reading backends and the
//! task supervisor together. It exposes add, update and delete per sensor
//! family and routes inbound gpio events to the motion state machine.

pub mod commands;
pub mod params;

pub use commands::{Command, CommandReply};
pub use params::{
    DeleteParams, Dht22Params, Dht22Update, MotionParams, MotionUpdate, OnewireParams,
    OnewireUpdate,
};

use crate::catalog::{Catalog, ModifyOutcome, SearchKey};
use crate::error::{Result, SensorsError};
use crate::events::{EventPublisher, GpioEvent};
use crate::gpio::{GpioAttributes, GpioDevice, GpioLedger, GpioMode};
use crate::motion;
use crate::readers::ReadingBackends;
use crate::sensors::{GpioAssignment, SensorFamily, SensorRecord, now};
use crate::tasks::TaskSupervisor;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ledger usage tag of the shared 1-wire bus line.
const ONEWIRE_USAGE: &str = "onewire";

/// Lines of the board as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleConfig {
    pub raspi_gpios: BTreeMap<String, u32>,
    pub assigned_gpios: BTreeSet<String>,
}

pub struct Sensors {
    ledger: Arc<dyn GpioLedger>,
    catalog: Arc<dyn Catalog>,
    publisher: Arc<dyn EventPublisher>,
    backends: ReadingBackends,
    tasks: TaskSupervisor,
    /// Serialises add, update and delete
    control: Mutex<()>,
}

impl Sensors {
    pub fn new(
        ledger: Arc<dyn GpioLedger>,
        catalog: Arc<dyn Catalog>,
        backends: ReadingBackends,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let tasks = TaskSupervisor::new(catalog.clone(), publisher.clone(), backends.clone());
        Self {
            ledger,
            catalog,
            publisher,
            backends,
            tasks,
            control: Mutex::new(()),
        }
    }

    pub fn tasks(&self) -> &TaskSupervisor {
        &self.tasks
    }

    /// Start polling every stored sensor. Returns the number of started tasks.
    pub fn configure(&self) -> usize {
        let mut started = 0;
        for record in self.catalog.all() {
            if self.tasks.is_running(&record.name) {
                continue;
            }
            if self.tasks.start(&record) {
                started += 1;
            }
        }
        info!("Sensors configured, {} polling task(s) started", started);
        started
    }

    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }

    pub fn sensors(&self) -> Vec<SensorRecord> {
        self.catalog.all()
    }

    pub fn sensor(&self, uuid: &str) -> Option<SensorRecord> {
        self.catalog.get(uuid)
    }

    pub async fn module_config(&self) -> Result<ModuleConfig> {
        Ok(ModuleConfig {
            raspi_gpios: self.ledger.available_gpios().await?,
            assigned_gpios: self.ledger.assigned_gpios().await?,
        })
    }

    pub async fn add_temperature_onewire(&self, params: OnewireParams) -> Result<SensorRecord> {
        let _control = self.control.lock().await;
        let valid = params.validate()?;
        self.ensure_unique_name(&valid.name, &[])?;
        // The bus line is shared by every probe, so it may already be assigned
        self.ensure_gpio_exists(&valid.gpio).await?;

        let device = self
            .ledger
            .reserve(ONEWIRE_USAGE, &valid.gpio, ONEWIRE_USAGE)
            .await?;
        let mut record = SensorRecord::onewire(
            &valid.name,
            device.assignment(),
            &valid.device,
            &valid.path,
            valid.polling.interval,
            valid.polling.offset,
            valid.polling.offset_unit,
        );
        let seed = self.backends.onewire.read(&record).await.into_reading();
        if let Some((celsius, fahrenheit)) = seed.temperature()
            && let Some(state) = record.temperature_mut()
        {
            state.celsius = Some(celsius);
            state.fahrenheit = Some(fahrenheit);
        }

        let record = match self.catalog.insert(record) {
            Ok(record) => record,
            Err(e) => return Err(self.rollback("add_temperature_onewire", e, &device, &[]).await),
        };
        self.tasks.start(&record);
        info!("1-wire sensor {} added", record.name);
        Ok(record)
    }

    pub async fn update_temperature_onewire(&self, params: OnewireUpdate) -> Result<SensorRecord> {
        let _control = self.control.lock().await;
        let current = self.existing(params.uuid()?, SensorFamily::Onewire)?;
        let valid = params.validate()?;
        self.ensure_unique_name(&valid.name, &[current.uuid.as_str()])?;

        let updated = self.apply(&current.uuid, |record| {
            record.name = valid.name.clone();
            record.set_interval(valid.polling.interval);
            if let Some(state) = record.temperature_mut() {
                state.set_offset(valid.polling.offset, valid.polling.offset_unit);
            }
        })?;
        self.tasks.restart(&current.name, &updated).await;
        info!("1-wire sensor {} updated", updated.name);
        Ok(updated)
    }

    pub async fn add_motion_generic(&self, params: MotionParams) -> Result<SensorRecord> {
        let _control = self.control.lock().await;
        let valid = params.validate()?;
        self.ensure_unique_name(&valid.name, &[])?;
        self.ensure_gpio_free(&valid.gpio).await?;
        self.ensure_gpio_exists(&valid.gpio).await?;

        let device = self
            .ledger
            .allocate(
                &format!("{}_motion", valid.name),
                &valid.gpio,
                GpioMode::Input,
                valid.inverted,
            )
            .await?;
        let record = SensorRecord::motion(&valid.name, device.assignment(), valid.inverted);
        let record = match self.catalog.insert(record) {
            Ok(record) => record,
            Err(e) => return Err(self.rollback("add_motion_generic", e, &device, &[]).await),
        };
        info!("Motion sensor {} added on {}", record.name, valid.gpio);
        Ok(record)
    }

    pub async fn update_motion_generic(&self, params: MotionUpdate) -> Result<SensorRecord> {
        let _control = self.control.lock().await;
        let current = self.existing(params.uuid()?, SensorFamily::Motion)?;
        let valid = params.validate()?;
        self.ensure_unique_name(&valid.name, &[current.uuid.as_str()])?;

        let attributes = GpioAttributes {
            name: format!("{}_motion", valid.name),
            inverted: valid.inverted,
        };
        for gpio in &current.gpios {
            self.ledger
                .reconfigure(&gpio.gpio_uuid, &attributes)
                .await?;
        }

        let updated = self.apply(&current.uuid, |record| {
            record.name = valid.name.clone();
            if let Some(state) = record.motion_mut() {
                state.inverted = valid.inverted;
            }
        })?;
        info!("Motion sensor {} updated", updated.name);
        Ok(updated)
    }

    /// Add a DHT22 probe as a temperature and a humidity record sharing one line.
    pub async fn add_dht22(&self, params: Dht22Params) -> Result<Vec<SensorRecord>> {
        let _control = self.control.lock().await;
        let valid = params.validate()?;
        self.ensure_unique_name(&valid.name, &[])?;
        self.ensure_gpio_free(&valid.gpio).await?;
        self.ensure_gpio_exists(&valid.gpio).await?;

        let device = self
            .ledger
            .allocate(
                &format!("{}_dht22", valid.name),
                &valid.gpio,
                GpioMode::Input,
                false,
            )
            .await?;

        let temperature = SensorRecord::dht22_temperature(
            &valid.name,
            device.assignment(),
            valid.polling.interval,
            valid.polling.offset,
            valid.polling.offset_unit,
        );
        let temperature = match self.catalog.insert(temperature) {
            Ok(record) => record,
            Err(e) => return Err(self.rollback("add_dht22", e, &device, &[]).await),
        };

        let humidity =
            SensorRecord::dht22_humidity(&valid.name, device.assignment(), valid.polling.interval);
        let humidity = match self.catalog.insert(humidity) {
            Ok(record) => record,
            Err(e) => {
                return Err(self
                    .rollback("add_dht22", e, &device, std::slice::from_ref(&temperature))
                    .await);
            }
        };

        self.tasks.start(&temperature);
        info!("DHT22 sensor {} added on {}", valid.name, valid.gpio);
        Ok(vec![temperature, humidity])
    }

    /// Update both halves of a DHT22 probe from the uuid of either one.
    pub async fn update_dht22(&self, params: Dht22Update) -> Result<Vec<SensorRecord>> {
        let _control = self.control.lock().await;
        let current = self.existing(params.uuid()?, SensorFamily::Dht22)?;
        let valid = params.validate()?;

        let halves: Vec<SensorRecord> = self
            .catalog
            .find_all(SearchKey::Name(&current.name))
            .into_iter()
            .filter(|record| record.family() == Some(SensorFamily::Dht22))
            .collect();
        let uuids: Vec<&str> = halves.iter().map(|record| record.uuid.as_str()).collect();
        self.ensure_unique_name(&valid.name, &uuids)?;

        let attributes = GpioAttributes {
            name: format!("{}_dht22", valid.name),
            inverted: false,
        };
        for gpio in &current.gpios {
            self.ledger
                .reconfigure(&gpio.gpio_uuid, &attributes)
                .await?;
        }

        let mut updated = Vec::with_capacity(halves.len());
        for half in &halves {
            let change = self.apply(&half.uuid, |record| {
                record.name = valid.name.clone();
                record.set_interval(valid.polling.interval);
                if let Some(state) = record.temperature_mut() {
                    state.set_offset(valid.polling.offset, valid.polling.offset_unit);
                }
            });
            match change {
                Ok(record) => updated.push(record),
                Err(e) => {
                    self.restore_dht22(&current, &halves[..updated.len()]).await;
                    return Err(e);
                }
            }
        }
        if let Some(first) = updated.first() {
            self.tasks.restart(&current.name, first).await;
        }
        info!("DHT22 sensor {} updated", valid.name);
        Ok(updated)
    }

    /// Put back the halves already written by a failed update, and the line name.
    async fn restore_dht22(&self, current: &SensorRecord, written: &[SensorRecord]) {
        warn!("DHT22 sensor {} update failed, restoring it", current.name);
        for original in written {
            if let Err(e) = self.apply(&original.uuid, |record| *record = original.clone()) {
                error!("Unable to restore sensor {}: {}", original.uuid, e);
            }
        }
        let attributes = GpioAttributes {
            name: format!("{}_dht22", current.name),
            inverted: false,
        };
        for gpio in &current.gpios {
            if let Err(e) = self.ledger.reconfigure(&gpio.gpio_uuid, &attributes).await {
                error!("Unable to restore gpio {}: {}", gpio.gpio, e);
            }
        }
    }

    /// Delete one record, releasing its line once nothing else uses it.
    ///
    /// A line the ledger no longer knows counts as already released. When the
    /// catalog removal or a release fails, the record is kept and its polling
    /// task started again.
    pub async fn delete_sensor(&self, uuid: &str) -> Result<()> {
        let _control = self.control.lock().await;
        let record = self
            .catalog
            .get(uuid)
            .ok_or_else(|| SensorsError::invalid("uuid", format!("sensor {} does not exist", uuid)))?;

        let mut releases = Vec::new();
        for gpio in &record.gpios {
            match self.ledger.is_reserved(&gpio.gpio_uuid).await {
                Ok(true) => {
                    debug!("Gpio {} is reserved by a driver, kept", gpio.gpio);
                    continue;
                }
                Ok(false) => {}
                Err(SensorsError::UnknownGpio(_)) => {
                    warn!(
                        "Gpio {} of sensor {} is unknown to the ledger, nothing to release",
                        gpio.gpio, record.name
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
            if self.catalog.gpio_uses(&gpio.gpio_uuid, Some(&record.uuid)) > 0 {
                debug!("Gpio {} still used by another sensor, kept", gpio.gpio);
                continue;
            }
            releases.push(gpio);
        }

        self.tasks.stop(&record).await;

        if let Err(e) = self.remove(&record, &releases).await {
            if !self.tasks.is_running(&record.name) {
                self.tasks.start(&record);
            }
            return Err(e);
        }
        info!("Sensor {} ({}) deleted", record.name, record.sensor_type());
        Ok(())
    }

    /// Remove the record, then release its lines. A failed release puts the
    /// record back.
    async fn remove(&self, record: &SensorRecord, releases: &[&GpioAssignment]) -> Result<()> {
        if !self.catalog.delete(&record.uuid)? {
            return Err(SensorsError::Catalog(format!(
                "unable to delete sensor {}",
                record.uuid
            )));
        }
        for gpio in releases {
            match self.ledger.release(&gpio.gpio_uuid).await {
                Ok(()) => {}
                Err(SensorsError::UnknownGpio(_)) => {
                    warn!("Gpio {} was already released", gpio.gpio);
                }
                Err(e) => {
                    if let Err(insert) = self.catalog.insert(record.clone()) {
                        error!("Unable to restore sensor {}: {}", record.uuid, insert);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Feed a line event to the motion sensor wired to that line.
    ///
    /// Returns true when the sensor changed state and an event was published.
    pub fn handle_gpio_event(&self, event: &GpioEvent) -> bool {
        if event.params.init {
            debug!("Init event for gpio {} dropped", event.device_id);
            return false;
        }
        let Some(sensor) = self
            .catalog
            .find_all(SearchKey::GpioUuid(&event.device_id))
            .into_iter()
            .find(|record| record.family() == Some(SensorFamily::Motion))
        else {
            debug!("No motion sensor on gpio {}", event.device_id);
            return false;
        };

        let mut published = None;
        let timestamp = now();
        let outcome = self
            .catalog
            .modify(&sensor.uuid, &mut |record: &mut SensorRecord| {
                published = motion::apply_edge(record, event.event, event.params.duration, timestamp);
                published.is_some()
            });
        match outcome {
            Ok(ModifyOutcome::Updated(_)) => match published {
                Some(event) => {
                    self.publisher.publish(&event);
                    true
                }
                None => false,
            },
            Ok(_) => false,
            Err(e) => {
                error!("Unable to store motion state of {}: {}", sensor.name, e);
                false
            }
        }
    }

    fn existing(&self, uuid: &str, family: SensorFamily) -> Result<SensorRecord> {
        let record = self
            .catalog
            .get(uuid)
            .ok_or_else(|| SensorsError::invalid("uuid", format!("sensor {} does not exist", uuid)))?;
        if record.family() != Some(family) {
            return Err(SensorsError::invalid(
                "uuid",
                format!("sensor {} is not a {} sensor", uuid, family),
            ));
        }
        Ok(record)
    }

    fn ensure_unique_name(&self, name: &str, excluding: &[&str]) -> Result<()> {
        let taken = self
            .catalog
            .find_all(SearchKey::Name(name))
            .iter()
            .any(|record| !excluding.contains(&record.uuid.as_str()));
        if taken {
            return Err(SensorsError::conflict(
                "name",
                format!("name \"{}\" is already used", name),
            ));
        }
        Ok(())
    }

    async fn ensure_gpio_free(&self, gpio: &str) -> Result<()> {
        if self.ledger.assigned_gpios().await?.contains(gpio) {
            return Err(SensorsError::conflict(
                "gpio",
                format!("gpio \"{}\" is already assigned", gpio),
            ));
        }
        Ok(())
    }

    async fn ensure_gpio_exists(&self, gpio: &str) -> Result<()> {
        if !self.ledger.available_gpios().await?.contains_key(gpio) {
            return Err(SensorsError::invalid(
                "gpio",
                format!("gpio \"{}\" does not exist on this board", gpio),
            ));
        }
        Ok(())
    }

    /// Apply a change to a stored record and return the result.
    fn apply(&self, uuid: &str, mut change: impl FnMut(&mut SensorRecord)) -> Result<SensorRecord> {
        let outcome = self.catalog.modify(uuid, &mut |record: &mut SensorRecord| {
            change(record);
            true
        })?;
        match outcome {
            ModifyOutcome::Updated(record) => Ok(record),
            _ => Err(SensorsError::Catalog(format!("sensor {} vanished", uuid))),
        }
    }

    /// Undo a partial add and wrap the error that caused it.
    async fn rollback(
        &self,
        operation: &'static str,
        cause: SensorsError,
        device: &GpioDevice,
        inserted: &[SensorRecord],
    ) -> SensorsError {
        warn!("{} failed, rolling back: {}", operation, cause);
        for record in inserted {
            if let Err(e) = self.catalog.delete(&record.uuid) {
                error!("Unable to remove sensor {} during rollback: {}", record.uuid, e);
            }
        }
        if self.catalog.gpio_uses(&device.uuid, None) == 0 {
            match self.ledger.is_reserved(&device.uuid).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = self.ledger.release(&device.uuid).await {
                        error!("Unable to release gpio {} during rollback: {}", device.gpio, e);
                    }
                }
                Err(e) => error!("Unable to check gpio {} during rollback: {}", device.gpio, e),
            }
        }
        SensorsError::OperationFailed {
            operation,
            source: Box::new(cause),
        }
    }
}
