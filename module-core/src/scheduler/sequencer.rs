//! Power sequencing for the cell sensor chain.
//!
//! The chain is powered down whenever its reports stop making sense and given
//! a settle tick plus one discarded frame before its data is trusted again.

use core::fmt;

/// Ticks the chain stays off before being powered back on.
pub const POWER_OFF_SETTLE_TICKS: u8 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CellStringPowerState {
    Init,
    Off,
    On,
    IgnoreFirstMessage,
    Operational,
}

impl CellStringPowerState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            CellStringPowerState::Init => "init",
            CellStringPowerState::Off => "off",
            CellStringPowerState::On => "on",
            CellStringPowerState::IgnoreFirstMessage => "ignore-first",
            CellStringPowerState::Operational => "operational",
        }
    }
}

impl fmt::Display for CellStringPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Effects of one sequencer step, applied by the caller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SequencerStep {
    /// Drive the chain power switch.
    pub power: Option<bool>,
    /// Discard the frame's cell data.
    pub clear_data: bool,
    /// Restart the fewest/most cell statistics.
    pub reset_count_extremes: bool,
    /// Report the change to the pack controller.
    pub request_status: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CellStringPowerSequencer {
    state: CellStringPowerState,
    timer: u8,
}

impl Default for CellStringPowerSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl CellStringPowerSequencer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: CellStringPowerState::Init,
            timer: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> CellStringPowerState {
        self.state
    }

    #[must_use]
    pub const fn is_operational(&self) -> bool {
        matches!(self.state, CellStringPowerState::Operational)
    }

    /// Counts the settle timer down; runs from the tick interrupt.
    pub fn on_timer_tick(&mut self) {
        self.timer = self.timer.saturating_sub(1);
    }

    /// Advances one frame phase.
    pub fn step(&mut self) -> SequencerStep {
        let mut step = SequencerStep::default();
        match self.state {
            CellStringPowerState::Init => {
                step.power = Some(false);
                step.clear_data = true;
                step.request_status = true;
                self.state = CellStringPowerState::Off;
            }
            CellStringPowerState::Off => {
                step.power = Some(false);
                step.clear_data = true;
                step.reset_count_extremes = true;
                self.timer = POWER_OFF_SETTLE_TICKS;
                self.state = CellStringPowerState::On;
            }
            CellStringPowerState::On => {
                if self.timer == 0 {
                    step.power = Some(true);
                    self.state = CellStringPowerState::IgnoreFirstMessage;
                }
            }
            CellStringPowerState::IgnoreFirstMessage => {
                self.state = CellStringPowerState::Operational;
            }
            CellStringPowerState::Operational => {}
        }
        step
    }

    /// Restarts the power cycle from Off.
    pub fn force_off(&mut self) {
        self.state = CellStringPowerState::Off;
    }
}

/// Counts consecutive frames whose cell count disagrees with the configured count.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MismatchMonitor {
    streak: u8,
}

impl MismatchMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self { streak: 0 }
    }

    #[must_use]
    pub const fn streak(&self) -> u8 {
        self.streak
    }

    /// Returns `true` when the chain should be power cycled.
    pub fn observe(&mut self, received: u8, expected: u8, threshold: u8) -> bool {
        let enabled = expected != 0 && threshold != 0 && threshold != u8::MAX;
        if !enabled {
            return false;
        }
        if received == expected {
            self.streak = 0;
            return false;
        }
        self.streak = self.streak.saturating_add(1);
        if self.streak >= threshold {
            self.streak = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_sequence_reaches_operational_after_settle() {
        let mut sequencer = CellStringPowerSequencer::new();

        let step = sequencer.step();
        assert_eq!(step.power, Some(false));
        assert!(step.request_status);
        assert_eq!(sequencer.state(), CellStringPowerState::Off);

        let step = sequencer.step();
        assert!(step.reset_count_extremes);
        assert_eq!(sequencer.state(), CellStringPowerState::On);

        // Timer still running.
        assert_eq!(sequencer.step(), SequencerStep::default());
        sequencer.on_timer_tick();

        assert_eq!(sequencer.step().power, Some(true));
        assert_eq!(sequencer.state(), CellStringPowerState::IgnoreFirstMessage);
        sequencer.step();
        assert!(sequencer.is_operational());
        assert_eq!(sequencer.step(), SequencerStep::default());
    }

    #[test]
    fn force_off_restarts_power_cycle() {
        let mut sequencer = CellStringPowerSequencer::new();
        sequencer.force_off();
        let step = sequencer.step();
        assert_eq!(step.power, Some(false));
        assert!(step.clear_data);
    }

    #[test]
    fn mismatch_streak_trips_at_threshold() {
        let mut monitor = MismatchMonitor::new();
        assert!(!monitor.observe(10, 12, 3));
        assert!(!monitor.observe(10, 12, 3));
        assert!(monitor.observe(10, 12, 3));
        assert_eq!(monitor.streak(), 0);

        assert!(!monitor.observe(10, 12, 3));
        assert!(!monitor.observe(12, 12, 3));
        assert_eq!(monitor.streak(), 0);
    }

    #[test]
    fn mismatch_check_disabled_by_configuration() {
        let mut monitor = MismatchMonitor::new();
        for _ in 0..10 {
            assert!(!monitor.observe(1, 12, 0));
            assert!(!monitor.observe(1, 12, u8::MAX));
            assert!(!monitor.observe(1, 0, 3));
        }
    }
}
