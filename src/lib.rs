//! GPIO sensors library.
//!
//! This library manages environmental sensors wired to GPIO lines: 1-wire
//! temperature probes, DHT22 temperature/humidity probes and motion
//! detectors. It polls them, keeps their latest values in a catalog and
//! publishes value changes.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gpio;
pub mod input;
pub mod motion;
pub mod persist;
pub mod readers;
pub mod sensors;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;
