//! Mirrors node telemetry to the log transport.
//!
//! The node keeps its own ring of events. After each pass the node task
//! drains the records added since the last drain, logging them through
//! defmt on the target and stdout on the host.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use module_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Cursor into a node's telemetry ring.
pub struct TelemetryDrain {
    next: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Logs every record added since the previous drain and returns how many
    /// were logged. Records the ring already overwrote are skipped.
    pub fn drain<const CAPACITY: usize>(
        &mut self,
        recorder: &TelemetryRecorder<CAPACITY>,
    ) -> usize {
        let mut logged = 0;
        for record in recorder.since(self.next) {
            emit_log(record);
            logged += 1;
        }
        self.next = recorder.next_id();
        logged
    }
}

impl Default for TelemetryDrain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
fn emit_log(record: &TelemetryRecord) {
    if record.event.is_fault() {
        defmt::warn!(
            "telemetry #{=u32} t={=u32} code={=u16:#x} {}",
            record.id,
            record.tick,
            record.event.code(),
            defmt::Display2Format(&record.event)
        );
    } else {
        defmt::info!(
            "telemetry #{=u32} t={=u32} code={=u16:#x} {}",
            record.id,
            record.tick,
            record.event.code(),
            defmt::Display2Format(&record.event)
        );
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(record: &TelemetryRecord) {
    let level = if record.event.is_fault() { "WARN" } else { "INFO" };
    println!(
        "{level} telemetry #{} t={} code={:#06x} {}",
        record.id,
        record.tick,
        record.event.code(),
        record.event
    );
}
