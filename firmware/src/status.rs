//! Shared status storage for the firmware target.
//!
//! Tasks bump these counters without touching the node, so the console can
//! report on the runtime plumbing alongside the node snapshot.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use module_core::durable::ResetCause;
use portable_atomic::{AtomicU8, AtomicU32, Ordering};

/// Scheduler ticks delivered to the node task.
static TICKS: AtomicU32 = AtomicU32::new(0);
/// Bus frames forwarded to the node.
static FRAMES_RECEIVED: AtomicU32 = AtomicU32::new(0);
/// Node inputs dropped because the queue was full.
static INPUTS_DROPPED: AtomicU32 = AtomicU32::new(0);
/// Console lines handed to the node.
static CONSOLE_LINES: AtomicU32 = AtomicU32::new(0);
/// Reset cause latched at boot.
static RESET_CAUSE: AtomicU8 = AtomicU8::new(encode_cause(ResetCause::Unknown));

const fn encode_cause(cause: ResetCause) -> u8 {
    match cause {
        ResetCause::PowerOn => 0,
        ResetCause::External => 1,
        ResetCause::BrownOut => 2,
        ResetCause::Watchdog => 3,
        ResetCause::Software => 4,
        ResetCause::Unknown => 5,
    }
}

const fn decode_cause(raw: u8) -> ResetCause {
    match raw {
        0 => ResetCause::PowerOn,
        1 => ResetCause::External,
        2 => ResetCause::BrownOut,
        3 => ResetCause::Watchdog,
        4 => ResetCause::Software,
        _ => ResetCause::Unknown,
    }
}

const fn cause_label(cause: ResetCause) -> &'static str {
    match cause {
        ResetCause::PowerOn => "power-on",
        ResetCause::External => "external",
        ResetCause::BrownOut => "brown-out",
        ResetCause::Watchdog => "watchdog",
        ResetCause::Software => "software",
        ResetCause::Unknown => "unknown",
    }
}

pub fn record_reset_cause(cause: ResetCause) {
    RESET_CAUSE.store(encode_cause(cause), Ordering::Relaxed);
}

pub fn record_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_frame_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_input_dropped() {
    INPUTS_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_console_line() {
    CONSOLE_LINES.fetch_add(1, Ordering::Relaxed);
}

/// Counters as read at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub ticks: u32,
    pub frames_received: u32,
    pub inputs_dropped: u32,
    pub console_lines: u32,
    pub reset_cause: ResetCause,
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fw ticks={} rx={} dropped={} lines={} reset={}",
            self.ticks,
            self.frames_received,
            self.inputs_dropped,
            self.console_lines,
            cause_label(self.reset_cause),
        )
    }
}

pub fn snapshot() -> RuntimeStatus {
    RuntimeStatus {
        ticks: TICKS.load(Ordering::Relaxed),
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        inputs_dropped: INPUTS_DROPPED.load(Ordering::Relaxed),
        console_lines: CONSOLE_LINES.load(Ordering::Relaxed),
        reset_cause: decode_cause(RESET_CAUSE.load(Ordering::Relaxed)),
    }
}
