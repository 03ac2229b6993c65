//! In-process catalog with optional JSON mirroring.

use super::{Catalog, ModifyOutcome, SearchKey};
use crate::error::{Result, SensorsError};
use crate::persist::JsonFile;
use crate::sensors::SensorRecord;
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;

type Records = BTreeMap<String, SensorRecord>;

/// Sensor records keyed by uuid.
///
/// Every mutation happens under the write lock and is mirrored to disk before
/// the lock is released; a failed write is undone in memory and reported as a
/// catalog error.
pub struct SensorStore {
    file: Option<JsonFile>,
    records: RwLock<Records>,
}

impl SensorStore {
    /// Store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            records: RwLock::new(Records::new()),
        }
    }

    /// Store backed by a JSON file, loading any existing records.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let file = JsonFile::new(path);
        let records: Records = file.load();
        debug!("Catalog holds {} sensor(s)", records.len());
        Self {
            file: Some(file),
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn persist(&self, records: &Records) -> Result<()> {
        match &self.file {
            Some(file) => file
                .save(records)
                .map_err(|e| SensorsError::Catalog(format!("failed to save catalog: {}", e))),
            None => Ok(()),
        }
    }
}

impl Catalog for SensorStore {
    fn insert(&self, mut record: SensorRecord) -> Result<SensorRecord> {
        if record.uuid.is_empty() {
            record.uuid = uuid::Uuid::new_v4().to_string();
        }

        let mut records = self.records.write();
        if records.contains_key(&record.uuid) {
            return Err(SensorsError::Catalog(format!(
                "record {} already exists",
                record.uuid
            )));
        }
        records.insert(record.uuid.clone(), record.clone());
        if let Err(e) = self.persist(&records) {
            records.remove(&record.uuid);
            return Err(e);
        }
        Ok(record)
    }

    fn modify(
        &self,
        uuid: &str,
        f: &mut dyn FnMut(&mut SensorRecord) -> bool,
    ) -> Result<ModifyOutcome> {
        let mut records = self.records.write();
        let Some(stored) = records.get_mut(uuid) else {
            return Ok(ModifyOutcome::Missing);
        };

        let previous = stored.clone();
        if !f(stored) {
            *stored = previous;
            return Ok(ModifyOutcome::Unchanged);
        }
        // uuid is the key and cannot be rewritten
        stored.uuid = uuid.to_string();
        let updated = stored.clone();

        if let Err(e) = self.persist(&records) {
            records.insert(uuid.to_string(), previous);
            return Err(e);
        }
        Ok(ModifyOutcome::Updated(updated))
    }

    fn delete(&self, uuid: &str) -> Result<bool> {
        let mut records = self.records.write();
        let Some(removed) = records.remove(uuid) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&records) {
            records.insert(uuid.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    fn get(&self, uuid: &str) -> Option<SensorRecord> {
        self.records.read().get(uuid).cloned()
    }

    fn find_one(&self, key: SearchKey<'_>) -> Option<SensorRecord> {
        self.records
            .read()
            .values()
            .find(|record| key.matches(record))
            .cloned()
    }

    fn find_all(&self, key: SearchKey<'_>) -> Vec<SensorRecord> {
        self.records
            .read()
            .values()
            .filter(|record| key.matches(record))
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<SensorRecord> {
        self.records.read().values().cloned().collect()
    }
}
