//! Polling task supervisor.
//!
//! One periodic task runs per sensor name. A 1-wire probe is polled on its
//! own; the temperature and humidity records of a DHT22 probe share a single
//! task since one command run yields both values. Motion sensors are event
//! driven and never get a task.

use crate::catalog::{Catalog, ModifyOutcome, SearchKey};
use crate::events::{EventPublisher, SensorEvent};
use crate::readers::{Reading, ReadingBackends};
use crate::sensors::{SensorFamily, SensorKind, SensorRecord, SensorSubtype, now};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Records driven by one polling task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingUnit {
    Onewire {
        uuid: String,
    },
    /// Either half may be absent while the pair is incomplete
    Dht22 {
        temperature: Option<String>,
        humidity: Option<String>,
    },
}

/// Shared handles a tick needs.
#[derive(Clone)]
pub struct TickContext {
    pub catalog: Arc<dyn Catalog>,
    pub publisher: Arc<dyn EventPublisher>,
    pub backends: ReadingBackends,
}

impl PollingUnit {
    /// Read once, store what was read and publish one event per updated record.
    ///
    /// Returns the number of published events.
    pub async fn tick(&self, ctx: &TickContext) -> usize {
        match self {
            PollingUnit::Onewire { uuid } => {
                let Some(record) = ctx.catalog.get(uuid) else {
                    debug!("Sensor {} no longer exists, skipping read", uuid);
                    return 0;
                };
                let reading = ctx.backends.onewire.read(&record).await.into_reading();
                let published = store_temperature(ctx, uuid, &reading, false);
                if published == 0 {
                    warn!("No temperature read for sensor {}", record.name);
                }
                published
            }
            PollingUnit::Dht22 {
                temperature,
                humidity,
            } => {
                let temperature = temperature.as_deref().and_then(|uuid| ctx.catalog.get(uuid));
                let humidity = humidity.as_deref().and_then(|uuid| ctx.catalog.get(uuid));
                let Some(probe) = temperature.as_ref().or(humidity.as_ref()) else {
                    debug!("DHT22 sensor no longer exists, skipping read");
                    return 0;
                };

                let reading = ctx.backends.dht22.read(probe).await.into_reading();
                if reading.is_empty() {
                    warn!("No value read for DHT22 sensor {}", probe.name);
                    return 0;
                }
                let mut published = 0;
                if let Some(record) = &temperature {
                    published += store_temperature(ctx, &record.uuid, &reading, true);
                }
                if let Some(record) = &humidity {
                    published += store_humidity(ctx, &record.uuid, &reading);
                }
                published
            }
        }
    }
}

fn store_temperature(ctx: &TickContext, uuid: &str, reading: &Reading, with_offsets: bool) -> usize {
    let Some((celsius, fahrenheit)) = reading.temperature() else {
        return 0;
    };
    store(ctx, uuid, &mut |record: &mut SensorRecord| {
        let Some(state) = record.temperature_mut() else {
            return false;
        };
        if with_offsets {
            state.celsius = Some(celsius + state.offset_celsius);
            state.fahrenheit = Some(fahrenheit + state.offset_fahrenheit);
        } else {
            state.celsius = Some(celsius);
            state.fahrenheit = Some(fahrenheit);
        }
        record.lastupdate = now();
        true
    })
}

fn store_humidity(ctx: &TickContext, uuid: &str, reading: &Reading) -> usize {
    let Some(humidity) = reading.humidity else {
        return 0;
    };
    store(ctx, uuid, &mut |record: &mut SensorRecord| {
        let Some(state) = record.humidity_mut() else {
            return false;
        };
        state.humidity = Some(humidity);
        record.lastupdate = now();
        true
    })
}

fn store(ctx: &TickContext, uuid: &str, f: &mut dyn FnMut(&mut SensorRecord) -> bool) -> usize {
    match ctx.catalog.modify(uuid, f) {
        Ok(ModifyOutcome::Updated(record)) => match SensorEvent::value_update(&record) {
            Some(event) => {
                ctx.publisher.publish(&event);
                1
            }
            None => 0,
        },
        Ok(ModifyOutcome::Missing) => {
            debug!("Sensor {} deleted during read", uuid);
            0
        }
        Ok(ModifyOutcome::Unchanged) => 0,
        Err(e) => {
            error!("Unable to store reading of sensor {}: {}", uuid, e);
            0
        }
    }
}

struct PollingTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the polling tasks, keyed by sensor name.
pub struct TaskSupervisor {
    ctx: TickContext,
    tasks: Mutex<HashMap<String, PollingTask>>,
}

impl TaskSupervisor {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        publisher: Arc<dyn EventPublisher>,
        backends: ReadingBackends,
    ) -> Self {
        Self {
            ctx: TickContext {
                catalog,
                publisher,
                backends,
            },
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }

    /// Names with a running task, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the polling unit of a sensor, `None` when it is not polled.
    pub fn unit_for(&self, sensor: &SensorRecord) -> Option<PollingUnit> {
        match sensor.family()? {
            SensorFamily::Motion => None,
            SensorFamily::Onewire => Some(PollingUnit::Onewire {
                uuid: sensor.uuid.clone(),
            }),
            SensorFamily::Dht22 => {
                let mut temperature = None;
                let mut humidity = None;
                let siblings = self.ctx.catalog.find_all(SearchKey::Name(&sensor.name));
                for record in siblings
                    .iter()
                    .chain(std::iter::once(sensor))
                    .filter(|record| record.subtype == SensorSubtype::Dht22)
                {
                    match record.kind {
                        SensorKind::Temperature(_) => {
                            temperature.get_or_insert_with(|| record.uuid.clone());
                        }
                        SensorKind::Humidity(_) => {
                            humidity.get_or_insert_with(|| record.uuid.clone());
                        }
                        SensorKind::Motion(_) => {}
                    }
                }
                Some(PollingUnit::Dht22 {
                    temperature,
                    humidity,
                })
            }
        }
    }

    /// Start the polling task of a sensor.
    ///
    /// Returns false when nothing was started: motion sensors, unsupported
    /// records and names that already have a task.
    pub fn start(&self, sensor: &SensorRecord) -> bool {
        let Some(family) = sensor.family() else {
            warn!(
                "Sensor {} has unsupported type {} for subtype {}",
                sensor.name,
                sensor.sensor_type(),
                sensor.subtype
            );
            return false;
        };
        if family == SensorFamily::Motion {
            debug!("Motion sensor {} is event driven, no task", sensor.name);
            return false;
        }
        let Some(unit) = self.unit_for(sensor) else {
            return false;
        };
        let period = match sensor.interval() {
            Some(interval) if interval > 0 => Duration::from_secs(interval),
            _ => {
                warn!("Sensor {} has no valid interval, task not started", sensor.name);
                return false;
            }
        };

        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&sensor.name) {
            warn!("Task for sensor {} is already running", sensor.name);
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(poll(unit, period, token.clone(), self.ctx.clone()));
        tasks.insert(sensor.name.clone(), PollingTask { token, handle });
        info!(
            "{} task started for sensor {} (every {:?})",
            family, sensor.name, period
        );
        true
    }

    /// Stop the polling task of a sensor about to be deleted.
    ///
    /// A DHT22 task is shared by both halves of the probe and keeps running
    /// while another record still references its line.
    pub async fn stop(&self, sensor: &SensorRecord) -> bool {
        match sensor.family() {
            Some(SensorFamily::Motion) | None => {
                debug!("No task to stop for sensor {}", sensor.name);
                return false;
            }
            Some(SensorFamily::Dht22) => {
                let still_used = sensor.gpios.iter().any(|gpio| {
                    self.ctx
                        .catalog
                        .gpio_uses(&gpio.gpio_uuid, Some(&sensor.uuid))
                        > 0
                });
                if still_used {
                    debug!(
                        "Task for sensor {} kept, its gpio is still used",
                        sensor.name
                    );
                    return false;
                }
            }
            Some(SensorFamily::Onewire) => {}
        }

        if !self.stop_task(&sensor.name).await {
            warn!("No task running for sensor {}", sensor.name);
            return false;
        }
        true
    }

    /// Replace the task registered under `previous_name` with a fresh one for `sensor`.
    pub async fn restart(&self, previous_name: &str, sensor: &SensorRecord) -> bool {
        self.stop_task(previous_name).await;
        self.start(sensor)
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(&self) {
        for name in self.running() {
            self.stop_task(&name).await;
        }
    }

    /// Unregister, cancel and await a task. No tick runs once this returns.
    async fn stop_task(&self, name: &str) -> bool {
        let removed = self.tasks.lock().remove(name);
        let Some(task) = removed else {
            return false;
        };

        task.token.cancel();
        if let Err(e) = task.handle.await
            && !e.is_cancelled()
        {
            error!("Task for sensor {} ended abnormally: {}", name, e);
        }
        info!("Task for sensor {} stopped", name);
        true
    }
}

async fn poll(unit: PollingUnit, period: Duration, token: CancellationToken, ctx: TickContext) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // An in-flight read is dropped on cancellation
        tokio::select! {
            _ = token.cancelled() => break,
            _ = unit.tick(&ctx) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SensorStore;
    use crate::readers::ReadOutcome;
    use crate::sensors::{OffsetUnit, test_gpio};
    use crate::testing::{RecordingPublisher, ScriptedBackend, backends, dht_reading};

    struct Fixture {
        catalog: Arc<SensorStore>,
        publisher: Arc<RecordingPublisher>,
        onewire: Arc<ScriptedBackend>,
        dht22: Arc<ScriptedBackend>,
        supervisor: TaskSupervisor,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(SensorStore::in_memory());
        let publisher = RecordingPublisher::new();
        let onewire = ScriptedBackend::always(ReadOutcome::Value(Reading::from_celsius(20.0)));
        let dht22 = ScriptedBackend::always(dht_reading(21.5, 70.7, 45.0));
        let supervisor = TaskSupervisor::new(
            catalog.clone(),
            publisher.clone(),
            backends(onewire.clone(), dht22.clone()),
        );
        Fixture {
            catalog,
            publisher,
            onewire,
            dht22,
            supervisor,
        }
    }

    fn dht_pair(catalog: &SensorStore, interval: u64) -> (SensorRecord, SensorRecord) {
        let gpio = test_gpio("GPIO17", "g-17", 11);
        let temperature = catalog
            .insert(SensorRecord::dht22_temperature(
                "attic",
                gpio.clone(),
                interval,
                0.0,
                OffsetUnit::Celsius,
            ))
            .unwrap();
        let humidity = catalog
            .insert(SensorRecord::dht22_humidity("attic", gpio, interval))
            .unwrap();
        (temperature, humidity)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let f = fixture();
        let (temperature, humidity) = dht_pair(&f.catalog, 30);

        assert!(f.supervisor.start(&temperature));
        assert!(!f.supervisor.start(&humidity));
        assert_eq!(f.supervisor.running(), vec!["attic".to_string()]);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.dht22.reads(), 1);
        assert_eq!(
            f.publisher.names(),
            vec!["sensors.temperature.update", "sensors.humidity.update"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let f = fixture();
        let onewire = f
            .catalog
            .insert(SensorRecord::onewire(
                "outdoor",
                test_gpio("GPIO4", "g-4", 7),
                "28-0000",
                "/unused",
                60,
                0.0,
                OffsetUnit::Celsius,
            ))
            .unwrap();

        assert!(f.supervisor.start(&onewire));
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(f.onewire.reads(), 0);
        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(f.onewire.reads(), 3);
        assert_eq!(
            f.catalog.get(&onewire.uuid).unwrap().temperature().unwrap().celsius,
            Some(20.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_keep_ticking() {
        let f = fixture();
        f.dht22
            .set_fallback(ReadOutcome::NoReading("timeout".to_string()));
        let (temperature, _) = dht_pair(&f.catalog, 30);

        f.supervisor.start(&temperature);
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(f.dht22.reads(), 3);
        assert_eq!(f.publisher.len(), 0);
        assert!(f.supervisor.is_running("attic"));

        f.dht22.push(dht_reading(19.0, 66.2, 50.0));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.publisher.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let f = fixture();
        let (temperature, _) = dht_pair(&f.catalog, 30);
        f.supervisor.start(&temperature);
        tokio::time::sleep(Duration::from_secs(31)).await;

        // The humidity half is gone from the catalog, the pair's line is free
        f.catalog.delete(&f.catalog.find_all(SearchKey::Name("attic"))[1].uuid).unwrap();
        let remaining = f.catalog.find_one(SearchKey::Name("attic")).unwrap();
        assert!(f.supervisor.stop(&remaining).await);
        assert!(!f.supervisor.is_running("attic"));

        let published = f.publisher.len();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.publisher.len(), published);
        assert!(!f.supervisor.stop(&remaining).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_task_while_sibling_remains() {
        let f = fixture();
        let (temperature, humidity) = dht_pair(&f.catalog, 30);
        f.supervisor.start(&temperature);

        assert!(!f.supervisor.stop(&temperature).await);
        assert!(f.supervisor.is_running("attic"));
        f.catalog.delete(&temperature.uuid).unwrap();

        // Only the humidity half is left and still gets readings
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.publisher.names(), vec!["sensors.humidity.update"]);

        assert!(f.supervisor.stop(&humidity).await);
        assert!(f.supervisor.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_applies_new_interval() {
        let f = fixture();
        let (mut temperature, _) = dht_pair(&f.catalog, 30);
        f.supervisor.start(&temperature);

        temperature.set_interval(120);
        assert!(f.supervisor.restart("attic", &temperature).await);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(f.dht22.reads(), 0);
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(f.dht22.reads(), 1);
    }

    #[tokio::test]
    async fn test_motion_has_no_task() {
        let f = fixture();
        let motion = f
            .catalog
            .insert(SensorRecord::motion("hall", test_gpio("GPIO18", "g-18", 12), false))
            .unwrap();
        assert!(!f.supervisor.start(&motion));
        assert!(!f.supervisor.stop(&motion).await);
        assert!(f.supervisor.running().is_empty());
    }

    #[tokio::test]
    async fn test_tick_combo_reading() {
        let f = fixture();
        let (temperature, humidity) = dht_pair(&f.catalog, 30);
        let unit = f.supervisor.unit_for(&temperature).unwrap();
        assert_eq!(
            unit,
            PollingUnit::Dht22 {
                temperature: Some(temperature.uuid.clone()),
                humidity: Some(humidity.uuid.clone()),
            }
        );

        assert_eq!(unit.tick(&f.supervisor.ctx).await, 2);
        let stored = f.catalog.get(&temperature.uuid).unwrap();
        assert_eq!(stored.temperature().unwrap().celsius, Some(21.5));
        assert_eq!(stored.temperature().unwrap().fahrenheit, Some(70.7));
        assert_eq!(
            f.catalog.get(&humidity.uuid).unwrap().kind,
            SensorKind::Humidity(crate::sensors::HumidityState {
                interval: 30,
                humidity: Some(45.0),
            })
        );

        f.dht22.push(ReadOutcome::NoReading("timeout".to_string()));
        f.publisher.clear();
        let before = f.catalog.get(&temperature.uuid).unwrap();
        assert_eq!(unit.tick(&f.supervisor.ctx).await, 0);
        assert_eq!(f.catalog.get(&temperature.uuid).unwrap(), before);
        assert_eq!(f.publisher.len(), 0);
    }

    #[tokio::test]
    async fn test_tick_applies_dht_offsets() {
        let f = fixture();
        let temperature = f
            .catalog
            .insert(SensorRecord::dht22_temperature(
                "attic",
                test_gpio("GPIO17", "g-17", 11),
                30,
                2.0,
                OffsetUnit::Celsius,
            ))
            .unwrap();
        let unit = f.supervisor.unit_for(&temperature).unwrap();
        assert_eq!(
            unit,
            PollingUnit::Dht22 {
                temperature: Some(temperature.uuid.clone()),
                humidity: None,
            }
        );

        assert_eq!(unit.tick(&f.supervisor.ctx).await, 1);
        let stored = f.catalog.get(&temperature.uuid).unwrap();
        assert_eq!(stored.temperature().unwrap().celsius, Some(23.5));
        assert!((stored.temperature().unwrap().fahrenheit.unwrap() - 106.3).abs() < 1e-9);
    }
}
