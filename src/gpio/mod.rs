//! Gpio line ledger.
//!
//! Line ownership belongs to an external service; the engine only needs the
//! operations of [`GpioLedger`]. [`BoardLedger`] is the in-process stand-in
//! used by the daemon and the tests.

pub mod board;

pub use board::BoardLedger;

use crate::error::Result;
use crate::sensors::GpioAssignment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioMode {
    Input,
    Output,
    /// Held for a bus driver (1-wire) rather than driven directly
    Reserved,
}

/// A line allocation held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioDevice {
    pub uuid: String,
    pub name: String,
    pub gpio: String,
    pub pin: u32,
    pub mode: GpioMode,
    pub inverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl GpioDevice {
    /// Entry to store in a sensor record's `gpios`.
    pub fn assignment(&self) -> GpioAssignment {
        GpioAssignment {
            gpio: self.gpio.clone(),
            gpio_uuid: self.uuid.clone(),
            pin: self.pin,
        }
    }
}

/// Attributes that can be changed on an existing allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioAttributes {
    pub name: String,
    pub inverted: bool,
}

#[async_trait]
pub trait GpioLedger: Send + Sync {
    /// Reserve a line for a bus usage; reserving again for the same usage shares it.
    async fn reserve(&self, name: &str, gpio: &str, usage: &str) -> Result<GpioDevice>;

    /// Allocate a line exclusively.
    async fn allocate(
        &self,
        name: &str,
        gpio: &str,
        mode: GpioMode,
        inverted: bool,
    ) -> Result<GpioDevice>;

    async fn release(&self, gpio_uuid: &str) -> Result<()>;

    /// Whether the line is held by a driver, independently of sensor assignment.
    async fn is_reserved(&self, gpio_uuid: &str) -> Result<bool>;

    async fn reconfigure(&self, gpio_uuid: &str, attributes: &GpioAttributes)
    -> Result<GpioDevice>;

    /// Line names currently allocated, reserved or held by a driver.
    async fn assigned_gpios(&self) -> Result<BTreeSet<String>>;

    /// Every line of this board with its physical pin.
    async fn available_gpios(&self) -> Result<BTreeMap<String, u32>>;
}
