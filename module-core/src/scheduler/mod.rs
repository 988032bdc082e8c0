//! Fixed-period frame timing.
//!
//! The tick interrupt advances a [`FrameCycle`] every 100 ms. Every third tick
//! the cycle flips between the Read phase (acquire cell data) and the Write
//! phase (process, store, and report it). The same tick drives the
//! loss-of-contact counter and the sensor chain's power-up timer.

pub mod sequencer;

use core::fmt;
use core::time::Duration;

pub use sequencer::{CellStringPowerSequencer, CellStringPowerState, MismatchMonitor, SequencerStep};

/// Scheduler tick period.
pub const TICK: Duration = Duration::from_millis(100);
/// Ticks per Read or Write phase.
pub const FRAME_TICKS: u8 = 3;
/// Ticks without a message from the pack controller before contact is lost (11.1 s).
pub const CONTACT_TIMEOUT_TICKS: u8 = 111;

/// Half of a frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Read,
    Write,
}

impl Phase {
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Phase::Read => Phase::Write,
            Phase::Write => Phase::Read,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Read => "read",
            Phase::Write => "write",
        })
    }
}

/// Tick counter and phase of the current frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameCycle {
    ticks: u8,
    phase: Phase,
    frame_start: bool,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    /// Starts in Write so the first boundary enters Read.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            phase: Phase::Write,
            frame_start: false,
        }
    }

    /// Advances one tick. Returns `true` when a new phase began.
    pub fn on_timer_tick(&mut self) -> bool {
        self.ticks += 1;
        if self.ticks < FRAME_TICKS {
            return false;
        }
        self.ticks = 0;
        self.frame_start = true;
        self.phase = self.phase.flipped();
        true
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Ticks elapsed in the current phase.
    #[must_use]
    pub const fn ticks(&self) -> u8 {
        self.ticks
    }

    #[must_use]
    pub const fn frame_start_pending(&self) -> bool {
        self.frame_start
    }

    /// Consumes the frame-start flag.
    pub fn take_frame_start(&mut self) -> bool {
        core::mem::take(&mut self.frame_start)
    }
}

/// Ticks since the pack controller was last heard from.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ContactTimer {
    ticks: u8,
    expired: bool,
}

impl ContactTimer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            expired: false,
        }
    }

    pub fn on_timer_tick(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
        if self.ticks >= CONTACT_TIMEOUT_TICKS {
            self.ticks -= CONTACT_TIMEOUT_TICKS;
            self.expired = true;
        }
    }

    /// Any inbound message counts as contact.
    pub fn refresh(&mut self) {
        self.ticks = 0;
    }

    #[must_use]
    pub const fn ticks(&self) -> u8 {
        self.ticks
    }

    /// Consumes the loss-of-contact flag.
    pub fn take_expired(&mut self) -> bool {
        core::mem::take(&mut self.expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_flips_every_three_ticks_starting_with_read() {
        let mut cycle = FrameCycle::new();
        assert_eq!(cycle.phase(), Phase::Write);

        assert!(!cycle.on_timer_tick());
        assert!(!cycle.on_timer_tick());
        assert!(cycle.on_timer_tick());
        assert_eq!(cycle.phase(), Phase::Read);
        assert!(cycle.take_frame_start());
        assert!(!cycle.take_frame_start());

        for _ in 0..FRAME_TICKS {
            cycle.on_timer_tick();
        }
        assert_eq!(cycle.phase(), Phase::Write);
        assert!(cycle.frame_start_pending());
    }

    #[test]
    fn contact_expires_every_timeout_period() {
        let mut contact = ContactTimer::new();
        for _ in 0..CONTACT_TIMEOUT_TICKS - 1 {
            contact.on_timer_tick();
        }
        assert!(!contact.take_expired());

        contact.on_timer_tick();
        assert!(contact.take_expired());
        assert_eq!(contact.ticks(), 0);
        assert!(!contact.take_expired());
    }

    #[test]
    fn refresh_restarts_the_contact_count() {
        let mut contact = ContactTimer::new();
        for _ in 0..100 {
            contact.on_timer_tick();
        }
        contact.refresh();
        for _ in 0..100 {
            contact.on_timer_tick();
        }
        assert!(!contact.take_expired());
    }
}
