//! Sensor catalog: keyed storage of sensor records.
//!
//! The engine only talks to the [`Catalog`] trait. Writers to one record are
//! serialised through [`Catalog::modify`], which runs a closure on the stored
//! record under the store's write lock.

pub mod store;

pub use store::SensorStore;

use crate::error::Result;
use crate::sensors::SensorRecord;

/// Field lookups supported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKey<'a> {
    Name(&'a str),
    GpioUuid(&'a str),
}

impl SearchKey<'_> {
    pub fn matches(&self, record: &SensorRecord) -> bool {
        match self {
            SearchKey::Name(name) => record.name == *name,
            SearchKey::GpioUuid(gpio_uuid) => record.uses_gpio(gpio_uuid),
        }
    }
}

/// Result of a read-modify-write on one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ModifyOutcome {
    /// No record with that uuid (it may have been deleted concurrently)
    Missing,
    /// The closure reported no change, nothing was written
    Unchanged,
    Updated(SensorRecord),
}

pub trait Catalog: Send + Sync {
    /// Store a new record and return it with its assigned uuid.
    fn insert(&self, record: SensorRecord) -> Result<SensorRecord>;

    /// Run `f` on the stored record atomically; `f` returns whether it changed anything.
    fn modify(
        &self,
        uuid: &str,
        f: &mut dyn FnMut(&mut SensorRecord) -> bool,
    ) -> Result<ModifyOutcome>;

    fn delete(&self, uuid: &str) -> Result<bool>;

    fn get(&self, uuid: &str) -> Option<SensorRecord>;

    fn find_one(&self, key: SearchKey<'_>) -> Option<SensorRecord>;

    fn find_all(&self, key: SearchKey<'_>) -> Vec<SensorRecord>;

    fn all(&self) -> Vec<SensorRecord>;

    /// Replace a stored record with `record` (matched by uuid).
    fn update(&self, record: &SensorRecord) -> Result<bool> {
        let outcome = self.modify(&record.uuid, &mut |stored: &mut SensorRecord| {
            *stored = record.clone();
            true
        })?;
        Ok(matches!(outcome, ModifyOutcome::Updated(_)))
    }

    /// Number of records referencing a line, optionally ignoring one record.
    ///
    /// Always derived from the stored records so it cannot drift.
    fn gpio_uses(&self, gpio_uuid: &str, excluding: Option<&str>) -> usize {
        self.find_all(SearchKey::GpioUuid(gpio_uuid))
            .iter()
            .filter(|record| Some(record.uuid.as_str()) != excluding)
            .count()
    }
}
