//! In-memory bus controller for host tests and the emulator.

use heapless::Deque;

use super::{CanController, CanFrame, ErrorCounters, TxSequence, TxStatus};

const TRANSMIT_LOG: usize = 32;

/// Controller that records transmitted frames and exposes its registers for tests.
#[derive(Debug)]
pub struct SimulatedController {
    transmitted: Deque<CanFrame, TRANSMIT_LOG>,
    transmit_count: u32,
    last_sequence: Option<TxSequence>,
    tx_status: TxStatus,
    aborts: u32,
    counters: ErrorCounters,
    enabled: bool,
    receive_armed: bool,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            transmitted: Deque::new(),
            transmit_count: 0,
            last_sequence: None,
            tx_status: TxStatus::Pending,
            aborts: 0,
            counters: ErrorCounters {
                transmit: 0,
                receive: 0,
            },
            enabled: true,
            receive_armed: true,
        }
    }

    /// Most recent frames handed to the mailbox, oldest first.
    #[must_use]
    pub fn transmitted(&self) -> &Deque<CanFrame, TRANSMIT_LOG> {
        &self.transmitted
    }

    /// Removes the oldest recorded frame.
    pub fn pop_transmitted(&mut self) -> Option<CanFrame> {
        self.transmitted.pop_front()
    }

    /// Frames handed to the mailbox since creation, retransmissions included.
    #[must_use]
    pub const fn transmit_count(&self) -> u32 {
        self.transmit_count
    }

    /// Sequence of the most recent frame handed to the mailbox.
    #[must_use]
    pub const fn last_sequence(&self) -> Option<TxSequence> {
        self.last_sequence
    }

    #[must_use]
    pub const fn aborts(&self) -> u32 {
        self.aborts
    }

    pub fn set_tx_status(&mut self, status: TxStatus) {
        self.tx_status = status;
    }

    pub fn set_error_counters(&mut self, counters: ErrorCounters) {
        self.counters = counters;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn disarm_receive(&mut self) {
        self.receive_armed = false;
    }
}

impl CanController for SimulatedController {
    fn start_transmit(&mut self, frame: &CanFrame, sequence: TxSequence) {
        if self.transmitted.is_full() {
            let _ = self.transmitted.pop_front();
        }
        let _ = self.transmitted.push_back(*frame);
        self.transmit_count = self.transmit_count.wrapping_add(1);
        self.last_sequence = Some(sequence);
        self.tx_status = TxStatus::Pending;
    }

    fn transmit_status(&mut self) -> TxStatus {
        self.tx_status
    }

    fn abort_transmit(&mut self) {
        self.aborts = self.aborts.wrapping_add(1);
        self.tx_status = TxStatus::Pending;
    }

    fn error_counters(&self) -> ErrorCounters {
        self.counters
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn receive_armed(&self) -> bool {
        self.receive_armed
    }

    fn arm_receive(&mut self) {
        self.receive_armed = true;
    }
}
