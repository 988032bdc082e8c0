//! Fault flags shared between the fault interrupt task and the node task.
//!
//! The interrupt side opens the power stage itself and records what
//! happened here. The node task consumes the flags on its next wake, so a
//! burst of edges can coalesce but never disappears.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use portable_atomic::{AtomicBool, Ordering};

/// Faults recorded since the node task last looked.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PendingFaults {
    pub overcurrent: bool,
    pub aux_power_lost: bool,
}

impl PendingFaults {
    #[must_use]
    pub const fn any(self) -> bool {
        self.overcurrent || self.aux_power_lost
    }
}

pub struct FaultLatch {
    armed: AtomicBool,
    tripped: AtomicBool,
    overcurrent: AtomicBool,
    aux_power_lost: AtomicBool,
}

impl FaultLatch {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            tripped: AtomicBool::new(false),
            overcurrent: AtomicBool::new(false),
            aux_power_lost: AtomicBool::new(false),
        }
    }

    /// Enables or disables overcurrent handling. Disarming also clears the
    /// trip so the next arming starts fresh.
    pub fn arm_overcurrent(&self, armed: bool) {
        if !armed {
            self.tripped.store(false, Ordering::Release);
        }
        self.armed.store(armed, Ordering::Release);
    }

    #[must_use]
    pub fn overcurrent_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Records an overcurrent edge. Returns `true` when the edge was armed
    /// and the caller must open the switch; the latch disarms itself so a
    /// bouncing line trips once.
    pub fn overcurrent_edge(&self) -> bool {
        if !self.armed.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.tripped.store(true, Ordering::Release);
        self.overcurrent.store(true, Ordering::Release);
        true
    }

    /// An armed edge fired and nothing has disarmed the latch since.
    #[must_use]
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn aux_power_lost(&self) {
        self.aux_power_lost.store(true, Ordering::Release);
    }

    /// Consumes the recorded faults.
    pub fn take(&self) -> PendingFaults {
        PendingFaults {
            overcurrent: self.overcurrent.swap(false, Ordering::AcqRel),
            aux_power_lost: self.aux_power_lost.swap(false, Ordering::AcqRel),
        }
    }
}

impl Default for FaultLatch {
    fn default() -> Self {
        Self::new()
    }
}
