//! Transports feeding the sensor engine.
//!
//! - `mqtt`: line events and control commands in, sensor events out

pub mod mqtt;
