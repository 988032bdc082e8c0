//! Software power stage for host tests and the emulator.

use core::time::Duration;

use heapless::HistoryBuf;

use super::PowerOutputs;

const EVENT_HISTORY: usize = 32;

/// Output change recorded by [`SimulatedOutputs`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputEvent {
    Relay(bool),
    Switch(bool),
    OvercurrentIrq(bool),
}

/// Power stage that only remembers what it was told to do.
#[derive(Debug, Default)]
pub struct SimulatedOutputs {
    relay: bool,
    switch: bool,
    overcurrent_irq: bool,
    overcurrent_latched: bool,
    analog_powered: bool,
    relay_ever_asserted: bool,
    switch_ever_asserted: bool,
    switch_pulses: u32,
    settled: Duration,
    events: HistoryBuf<OutputEvent, EVENT_HISTORY>,
}

impl SimulatedOutputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn relay(&self) -> bool {
        self.relay
    }

    #[must_use]
    pub fn switch(&self) -> bool {
        self.switch
    }

    #[must_use]
    pub fn overcurrent_irq(&self) -> bool {
        self.overcurrent_irq
    }

    #[must_use]
    pub fn analog_powered(&self) -> bool {
        self.analog_powered
    }

    #[must_use]
    pub fn relay_ever_asserted(&self) -> bool {
        self.relay_ever_asserted
    }

    #[must_use]
    pub fn switch_ever_asserted(&self) -> bool {
        self.switch_ever_asserted
    }

    /// Number of times the switch was driven closed.
    #[must_use]
    pub fn switch_pulses(&self) -> u32 {
        self.switch_pulses
    }

    /// Total busy-wait time requested so far.
    #[must_use]
    pub fn settled(&self) -> Duration {
        self.settled
    }

    /// Forces the overcurrent latch, as the comparator would.
    pub fn latch_overcurrent(&mut self, latched: bool) {
        self.overcurrent_latched = latched;
        if latched {
            self.switch = false;
        }
    }

    /// Recorded output changes, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &OutputEvent> {
        self.events.oldest_ordered()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

impl PowerOutputs for SimulatedOutputs {
    fn set_relay(&mut self, asserted: bool) {
        if asserted != self.relay {
            self.events.write(OutputEvent::Relay(asserted));
        }
        self.relay = asserted;
        self.relay_ever_asserted |= asserted;
    }

    fn relay_asserted(&self) -> bool {
        self.relay
    }

    fn set_switch(&mut self, asserted: bool) {
        if asserted != self.switch {
            self.events.write(OutputEvent::Switch(asserted));
        }
        if asserted {
            self.switch_pulses = self.switch_pulses.saturating_add(1);
        }
        self.switch = asserted;
        self.switch_ever_asserted |= asserted;
    }

    fn set_overcurrent_irq(&mut self, enabled: bool) {
        if enabled != self.overcurrent_irq {
            self.events.write(OutputEvent::OvercurrentIrq(enabled));
        }
        self.overcurrent_irq = enabled;
    }

    fn overcurrent_latched(&self) -> bool {
        self.overcurrent_latched
    }

    fn set_analog_power(&mut self, on: bool) {
        self.analog_powered = on;
    }

    fn settle(&mut self, duration: Duration) {
        self.settled += duration;
    }
}
