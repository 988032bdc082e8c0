//! FDCAN1 adapter.
//!
//! The transport drives a single-mailbox controller. Here the mailbox is a
//! one-slot channel drained by the CAN task, which reports the outcome of
//! each frame back under its [`TxSequence`]. A frame accepted into the
//! peripheral's transmit queue counts as complete.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use module_core::transport::{CanController, CanFrame, ErrorCounters, TxSequence, TxStatus};
use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

pub const BITRATE: u32 = 250_000;

const PENDING: u32 = 0;
const COMPLETE: u32 = 1;
const FAILED: u32 = 2;

pub static OUTBOUND: Channel<CriticalSectionRawMutex, (TxSequence, CanFrame), 1> = Channel::new();

/// Last reported outcome: sequence in the upper half, status in the lower.
static TX_OUTCOME: AtomicU32 = AtomicU32::new(PENDING);
static TX_ERRORS: AtomicU8 = AtomicU8::new(0);
static RX_ERRORS: AtomicU8 = AtomicU8::new(0);
static ENABLED: AtomicBool = AtomicBool::new(true);

fn outcome(sequence: TxSequence, status: u32) -> u32 {
    (u32::from(sequence.to_raw()) << 16) | status
}

pub fn mark_complete(sequence: TxSequence) {
    TX_OUTCOME.store(outcome(sequence, COMPLETE), Ordering::Release);
}

pub fn mark_failed(sequence: TxSequence) {
    TX_OUTCOME.store(outcome(sequence, FAILED), Ordering::Release);
}

/// Latest counters sampled by the CAN task.
pub fn record_counters(counters: ErrorCounters, bus_off: bool) {
    TX_ERRORS.store(counters.transmit, Ordering::Relaxed);
    RX_ERRORS.store(counters.receive, Ordering::Relaxed);
    ENABLED.store(!bus_off, Ordering::Relaxed);
}

pub struct FdcanController {
    pending: Option<TxSequence>,
}

impl FdcanController {
    pub const fn new() -> Self {
        Self { pending: None }
    }
}

impl Default for FdcanController {
    fn default() -> Self {
        Self::new()
    }
}

impl CanController for FdcanController {
    fn start_transmit(&mut self, frame: &CanFrame, sequence: TxSequence) {
        OUTBOUND.clear();
        self.pending = Some(sequence);
        if OUTBOUND.try_send((sequence, *frame)).is_err() {
            mark_failed(sequence);
        }
    }

    // Outcomes recorded for an earlier frame read as still pending.
    fn transmit_status(&mut self) -> TxStatus {
        let Some(sequence) = self.pending else {
            return TxStatus::Pending;
        };
        let recorded = TX_OUTCOME.load(Ordering::Acquire);
        if recorded == outcome(sequence, COMPLETE) {
            TxStatus::Complete
        } else if recorded == outcome(sequence, FAILED) {
            TxStatus::Failed
        } else {
            TxStatus::Pending
        }
    }

    fn abort_transmit(&mut self) {
        OUTBOUND.clear();
        self.pending = None;
    }

    fn error_counters(&self) -> ErrorCounters {
        ErrorCounters {
            transmit: TX_ERRORS.load(Ordering::Relaxed),
            receive: RX_ERRORS.load(Ordering::Relaxed),
        }
    }

    fn is_enabled(&self) -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    // The peripheral leaves bus-off on its own after 128 idle sequences.
    fn enable(&mut self) {
        ENABLED.store(true, Ordering::Relaxed);
    }

    fn receive_armed(&self) -> bool {
        true
    }

    fn arm_receive(&mut self) {}
}
