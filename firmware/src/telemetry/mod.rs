//! Log sink for the node telemetry ring.
//!
//! The loop records into `node_core::telemetry::TelemetryRecorder`; this module
//! forwards every record it has not seen yet to defmt on target, or stdout on
//! the host, once per iteration. Display and radio stand-ins log through the
//! same helpers so bring-up output stays in one stream.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use node_core::display::{Layout, Screen};
use node_core::sensor::Reading;
use node_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Ids further ahead of the cursor than this are treated as already logged.
const ID_WINDOW: u32 = u32::MAX / 2;

/// Tracks which telemetry records have already been emitted.
pub struct TelemetryLog {
    next_id: EventId,
}

impl TelemetryLog {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Emits every record newer than the previous drain and returns the count.
    ///
    /// Records that fell out of the ring between drains are skipped silently.
    pub fn drain<const CAPACITY: usize>(
        &mut self,
        recorder: &TelemetryRecorder<CAPACITY>,
    ) -> usize {
        self.drain_with(recorder, emit_record)
    }

    fn drain_with<const CAPACITY: usize>(
        &mut self,
        recorder: &TelemetryRecorder<CAPACITY>,
        mut sink: impl FnMut(&TelemetryRecord),
    ) -> usize {
        let mut emitted = 0;
        for record in recorder.oldest_first() {
            if record.id.wrapping_sub(self.next_id) < ID_WINDOW {
                sink(record);
                emitted += 1;
            }
        }
        self.next_id = recorder.next_id();
        emitted
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
pub fn emit_record(record: &TelemetryRecord) {
    defmt::info!("telemetry:node {}", defmt::Display2Format(record));
}

#[cfg(not(target_os = "none"))]
pub fn emit_record(record: &TelemetryRecord) {
    println!("telemetry:node {record}");
}

#[cfg(target_os = "none")]
pub fn emit_screen(layout: Layout, screen: &Screen) {
    defmt::info!(
        "display:{} big={} small={} link={}",
        layout.label(),
        screen.big_x10,
        screen.small_x10,
        screen.link
    );
}

#[cfg(not(target_os = "none"))]
pub fn emit_screen(layout: Layout, screen: &Screen) {
    println!(
        "display:{} big={:?} small={:?} link={}",
        layout.label(),
        screen.big_x10,
        screen.small_x10,
        screen.link
    );
}

#[cfg(target_os = "none")]
pub fn emit_notification(reading: Reading) {
    defmt::info!("radio:notify {}", defmt::Display2Format(&reading));
}

#[cfg(not(target_os = "none"))]
pub fn emit_notification(reading: Reading) {
    println!("radio:notify {reading}");
}
