//! Motion sensor state machine.
//!
//! Two states, `off` and `on`. A rising edge turns an idle sensor on, a
//! falling edge turns an active sensor off and records how long it lasted.
//! Repeated edges in the same direction are ignored.

use crate::events::{Edge, SensorEvent};
use crate::sensors::SensorRecord;
use log::debug;

/// Apply an edge to a motion record at time `now`.
///
/// Returns the event to publish when the record changed, `None` when the
/// edge was a duplicate or the record is not a motion sensor.
pub fn apply_edge(
    record: &mut SensorRecord,
    edge: Edge,
    duration: Option<f64>,
    now: i64,
) -> Option<SensorEvent> {
    let previous_update = record.lastupdate;
    let state = record.motion_mut()?;

    match (edge, state.on) {
        (Edge::Rising, false) => {
            state.on = true;
            record.lastupdate = now;
            Some(SensorEvent::MotionOn {
                sensor: record.name.clone(),
                lastupdate: now,
                device_id: record.uuid.clone(),
            })
        }
        (Edge::Falling, true) => {
            // Fall back on the time elapsed since the rising edge
            let duration = duration.unwrap_or_else(|| (now - previous_update).max(0) as f64);
            state.on = false;
            state.lastduration = duration;
            record.lastupdate = now;
            Some(SensorEvent::MotionOff {
                sensor: record.name.clone(),
                duration,
                lastupdate: now,
                device_id: record.uuid.clone(),
            })
        }
        (edge, on) => {
            debug!(
                "Motion sensor {} ignores {:?} edge (on={})",
                record.name, edge, on
            );
            None
        }
    }
}
