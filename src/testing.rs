//! Fakes shared by the unit tests.

use crate::catalog::{Catalog, ModifyOutcome, SearchKey, SensorStore};
use crate::config::BoardConfig;
use crate::error::{Result, SensorsError};
use crate::events::{EventPublisher, SensorEvent};
use crate::gpio::BoardLedger;
use crate::readers::{ReadOutcome, Reading, ReadingBackend, ReadingBackends};
use crate::sensors::SensorRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Backend returning queued outcomes, then a fallback.
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<ReadOutcome>>,
    fallback: Mutex<ReadOutcome>,
    reads: AtomicUsize,
}

impl ScriptedBackend {
    pub fn always(outcome: ReadOutcome) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(outcome),
            reads: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::always(ReadOutcome::NoReading("no probe".to_string()))
    }

    pub fn push(&self, outcome: ReadOutcome) {
        self.queue.lock().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: ReadOutcome) {
        *self.fallback.lock() = outcome;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingBackend for ScriptedBackend {
    async fn read(&self, _sensor: &SensorRecord) -> ReadOutcome {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let queued = self.queue.lock().pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

pub fn dht_reading(celsius: f64, fahrenheit: f64, humidity: f64) -> ReadOutcome {
    ReadOutcome::Value(Reading {
        celsius: Some(celsius),
        fahrenheit: Some(fahrenheit),
        humidity: Some(humidity),
    })
}

pub fn backends(onewire: Arc<ScriptedBackend>, dht22: Arc<ScriptedBackend>) -> ReadingBackends {
    ReadingBackends { onewire, dht22 }
}

/// Publisher keeping every event in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<SensorEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SensorEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(SensorEvent::name).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &SensorEvent) {
        self.events.lock().push(event.clone());
    }
}

/// In-memory catalog whose inserts start failing after `ok_inserts` successes.
pub struct FlakyCatalog {
    inner: SensorStore,
    ok_inserts: usize,
    inserts: AtomicUsize,
    reject_deletes: AtomicBool,
    /// Successful modifies left before the next one fails
    failing_modify: Mutex<Option<usize>>,
}

impl FlakyCatalog {
    pub fn failing_after(ok_inserts: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: SensorStore::in_memory(),
            ok_inserts,
            inserts: AtomicUsize::new(0),
            reject_deletes: AtomicBool::new(false),
            failing_modify: Mutex::new(None),
        })
    }

    pub fn reject_deletes(&self, reject: bool) {
        self.reject_deletes.store(reject, Ordering::SeqCst);
    }

    /// Fail one modify after `ok_modifies` more succeed.
    pub fn fail_modify_after(&self, ok_modifies: usize) {
        *self.failing_modify.lock() = Some(ok_modifies);
    }
}

impl Catalog for FlakyCatalog {
    fn insert(&self, record: SensorRecord) -> Result<SensorRecord> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.ok_inserts {
            return Err(SensorsError::Catalog("insert rejected".to_string()));
        }
        self.inner.insert(record)
    }

    fn modify(
        &self,
        uuid: &str,
        f: &mut dyn FnMut(&mut SensorRecord) -> bool,
    ) -> Result<ModifyOutcome> {
        {
            let mut failing = self.failing_modify.lock();
            match *failing {
                Some(0) => {
                    *failing = None;
                    return Err(SensorsError::Catalog("modify rejected".to_string()));
                }
                Some(left) => *failing = Some(left - 1),
                None => {}
            }
        }
        self.inner.modify(uuid, f)
    }

    fn delete(&self, uuid: &str) -> Result<bool> {
        if self.reject_deletes.load(Ordering::SeqCst) {
            return Err(SensorsError::Catalog("delete rejected".to_string()));
        }
        self.inner.delete(uuid)
    }

    fn get(&self, uuid: &str) -> Option<SensorRecord> {
        self.inner.get(uuid)
    }

    fn find_one(&self, key: SearchKey<'_>) -> Option<SensorRecord> {
        self.inner.find_one(key)
    }

    fn find_all(&self, key: SearchKey<'_>) -> Vec<SensorRecord> {
        self.inner.find_all(key)
    }

    fn all(&self) -> Vec<SensorRecord> {
        self.inner.all()
    }
}

/// Ledger over the default Raspberry Pi header.
pub fn pi_ledger() -> Arc<BoardLedger> {
    Arc::new(BoardLedger::new(BoardConfig::default().gpios))
}
