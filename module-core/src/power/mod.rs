//! Relay and solid-state switch sequencing.
//!
//! [`PowerStateMachine`] owns the output hardware and the watchdog. The
//! current/target/max triple lives in the [`DurableState`] record so an
//! interrupted transition can be re-run after a watchdog reset: every step is
//! safe to repeat, and the handler simply drives `current` toward `target`
//! again.

use core::fmt;
use core::time::Duration;

use crate::durable::{DurableState, RecoveryTag, Watchdog, WatchdogLeash, guarded_step};

pub mod sim;

/// Gate discharge / contact settle time after each output change.
pub const SETTLE_DELAY: Duration = Duration::from_millis(5);
/// Width of one precharge switch pulse.
pub const PRECHARGE_PULSE_WIDTH: Duration = Duration::from_millis(1);
/// Pause between precharge pulses.
pub const PRECHARGE_RECOVERY: Duration = Duration::from_millis(50);
/// Pulses issued by a precharge transition.
pub const PRECHARGE_PULSES: u8 = 11;
/// Extra pulses granted for current-limited pulses before precharge gives up.
pub const PRECHARGE_EXTRA_PULSE_LIMIT: u8 = 11;

/// Operating states of the module.
///
/// The ordering follows the wire encoding; `Init` sorts above every
/// requestable state so the max clamp always pulls it down.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ModuleState {
    Off,
    Standby,
    Precharge,
    On,
    Init,
}

impl ModuleState {
    /// State entered after init and after every fault.
    pub const DEFAULT: ModuleState = ModuleState::Off;

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ModuleState::Off => 0,
            ModuleState::Standby => 1,
            ModuleState::Precharge => 2,
            ModuleState::On => 3,
            ModuleState::Init => 4,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ModuleState::Off),
            1 => Some(ModuleState::Standby),
            2 => Some(ModuleState::Precharge),
            3 => Some(ModuleState::On),
            4 => Some(ModuleState::Init),
            _ => None,
        }
    }

    /// Decodes a state requested over the bus; `Init` is not requestable.
    #[must_use]
    pub const fn from_request(raw: u8) -> Option<Self> {
        match Self::from_raw(raw) {
            Some(ModuleState::Init) | None => None,
            state => state,
        }
    }

    /// Returns `true` for states that energise the relay or the switch.
    #[must_use]
    pub const fn asserts_outputs(self) -> bool {
        matches!(
            self,
            ModuleState::Standby | ModuleState::Precharge | ModuleState::On
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ModuleState::Off => "off",
            ModuleState::Standby => "standby",
            ModuleState::Precharge => "precharge",
            ModuleState::On => "on",
            ModuleState::Init => "init",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Hardware abstraction for the power stage.
pub trait PowerOutputs {
    fn set_relay(&mut self, asserted: bool);

    /// Reads back the relay enable line.
    fn relay_asserted(&self) -> bool;

    fn set_switch(&mut self, asserted: bool);

    /// Enables or disables the overcurrent status interrupt.
    fn set_overcurrent_irq(&mut self, enabled: bool);

    /// Returns `true` while the overcurrent/overtemperature latch has cleared the switch.
    fn overcurrent_latched(&self) -> bool;

    /// Powers the analog front end.
    fn set_analog_power(&mut self, on: bool);

    /// Busy-waits for the given duration.
    fn settle(&mut self, duration: Duration);
}

/// Cell balancing bookkeeping adjusted by transitions.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BalanceFlags {
    pub ready: bool,
    pub balanced_once: bool,
    pub stop_discharge: bool,
}

impl BalanceFlags {
    const IDLE: BalanceFlags = BalanceFlags {
        ready: true,
        balanced_once: false,
        stop_discharge: false,
    };

    const CONDUCTING: BalanceFlags = BalanceFlags {
        ready: false,
        balanced_once: false,
        stop_discharge: true,
    };
}

/// Completed state change reported by [`PowerStateMachine::handle`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub from: ModuleState,
    pub to: ModuleState,
}

/// Sequencer for the relay and switch outputs.
pub struct PowerStateMachine<P, W> {
    outputs: P,
    watchdog: W,
    balance: BalanceFlags,
    overcurrent_signal: bool,
    overcurrent_irq: bool,
}

impl<P, W> PowerStateMachine<P, W>
where
    P: PowerOutputs,
    W: Watchdog,
{
    pub fn new(outputs: P, watchdog: W) -> Self {
        Self {
            outputs,
            watchdog,
            balance: BalanceFlags::default(),
            overcurrent_signal: false,
            overcurrent_irq: false,
        }
    }

    pub fn outputs(&self) -> &P {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut P {
        &mut self.outputs
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    pub fn watchdog_mut(&mut self) -> &mut W {
        &mut self.watchdog
    }

    pub fn balance(&self) -> BalanceFlags {
        self.balance
    }

    /// Consumes a pending stop-discharge request for the next acquisition.
    pub fn take_stop_discharge(&mut self) -> bool {
        if self.balance.stop_discharge {
            self.balance.stop_discharge = false;
            self.balance.balanced_once = true;
            true
        } else {
            false
        }
    }

    /// Returns `true` once an overcurrent edge has been latched since the last clear.
    pub fn overcurrent_signal(&self) -> bool {
        self.overcurrent_signal
    }

    pub fn clear_overcurrent_signal(&mut self) {
        self.overcurrent_signal = false;
    }

    pub fn overcurrent_irq_enabled(&self) -> bool {
        self.overcurrent_irq
    }

    /// Drives `current` toward `target`, honouring the max clamp and the registration interlock.
    pub fn handle(&mut self, durable: &mut DurableState) -> Option<Transition> {
        let current = durable.current();

        if current == ModuleState::Init {
            self.enter_init(durable);
            durable.set_current(ModuleState::Off);
            return Some(Transition {
                from: ModuleState::Init,
                to: ModuleState::Off,
            });
        }

        let max = durable.max();
        let mut next = durable.target();
        if next > max || current > max {
            next = max;
        }
        if next.asserts_outputs() && !durable.is_registered() {
            next = ModuleState::Off;
        }
        if next == ModuleState::Init {
            next = ModuleState::DEFAULT;
        }
        if durable.target() != next {
            durable.set_target(next);
        }

        if next == current {
            return None;
        }

        let reached = match next {
            ModuleState::Off | ModuleState::Init => {
                self.enter_off(durable);
                ModuleState::Off
            }
            ModuleState::Standby => {
                self.enter_standby(durable);
                ModuleState::Standby
            }
            ModuleState::Precharge => {
                if self.enter_precharge(durable) {
                    ModuleState::Precharge
                } else {
                    self.enter_off(durable);
                    durable.set_target(ModuleState::Off);
                    ModuleState::Off
                }
            }
            ModuleState::On => {
                self.enter_on(durable);
                ModuleState::On
            }
        };

        durable.set_current(reached);
        Some(Transition {
            from: current,
            to: reached,
        })
    }

    /// Overcurrent status line edge. Returns `true` when the switch was tripped.
    pub fn overcurrent_edge(&mut self, durable: &mut DurableState) -> bool {
        let current = durable.current();
        if !matches!(current, ModuleState::On | ModuleState::Precharge) {
            return false;
        }
        if !self.outputs.overcurrent_latched() {
            return false;
        }

        self.outputs.set_switch(false);
        if current == ModuleState::On {
            durable.set_target(ModuleState::Standby);
        }
        self.set_overcurrent_irq(false);
        self.overcurrent_signal = true;
        true
    }

    /// Auxiliary supply dropped: both outputs open immediately.
    pub fn aux_power_lost(&mut self, durable: &mut DurableState) {
        self.outputs.set_switch(false);
        self.outputs.set_relay(false);
        durable.set_target(ModuleState::Off);
    }

    fn enter_init(&mut self, durable: &mut DurableState) {
        self.watchdog.set_leash(WatchdogLeash::Long);
        self.outputs.set_analog_power(true);
        self.enter_off(durable);
        durable.set_target(ModuleState::DEFAULT);
    }

    fn enter_off(&mut self, durable: &mut DurableState) {
        self.open_switch(durable);
        let outputs = &mut self.outputs;
        guarded_step(durable, &mut self.watchdog, RecoveryTag::RelayOff, || {
            outputs.set_relay(false);
            outputs.settle(SETTLE_DELAY);
        });
        self.set_overcurrent_irq(false);
        self.balance = BalanceFlags::IDLE;
    }

    fn enter_standby(&mut self, durable: &mut DurableState) {
        self.open_switch(durable);
        self.set_overcurrent_irq(false);
        self.close_relay(durable);
        self.balance = BalanceFlags::IDLE;
    }

    /// Returns `false` when precharge kept tripping the current limit.
    fn enter_precharge(&mut self, durable: &mut DurableState) -> bool {
        if !self.outputs.relay_asserted() {
            self.close_relay(durable);
        }

        let registered = durable.is_registered();
        let mut remaining = PRECHARGE_PULSES;
        let mut extra = 0u8;

        while remaining > 0 {
            remaining -= 1;

            let outputs = &mut self.outputs;
            guarded_step(durable, &mut self.watchdog, RecoveryTag::SwitchOn, || {
                if registered {
                    outputs.set_switch(true);
                }
                outputs.settle(PRECHARGE_PULSE_WIDTH);
                outputs.set_switch(false);
                outputs.settle(SETTLE_DELAY);
            });
            self.outputs.settle(PRECHARGE_RECOVERY);
            self.watchdog.feed();

            if self.overcurrent_signal || self.outputs.overcurrent_latched() {
                self.overcurrent_signal = false;
                if extra == PRECHARGE_EXTRA_PULSE_LIMIT {
                    return false;
                }
                extra += 1;
                remaining += 1;
            }
        }

        true
    }

    fn enter_on(&mut self, durable: &mut DurableState) {
        if !self.outputs.relay_asserted() {
            self.close_relay(durable);
        }

        let registered = durable.is_registered();
        let outputs = &mut self.outputs;
        guarded_step(durable, &mut self.watchdog, RecoveryTag::SwitchOn, || {
            if registered {
                outputs.set_switch(true);
            }
            outputs.settle(SETTLE_DELAY);
        });

        self.balance = BalanceFlags::CONDUCTING;
        self.set_overcurrent_irq(true);
    }

    fn open_switch(&mut self, durable: &mut DurableState) {
        let outputs = &mut self.outputs;
        guarded_step(durable, &mut self.watchdog, RecoveryTag::SwitchOff, || {
            outputs.set_switch(false);
            outputs.settle(SETTLE_DELAY);
        });
    }

    fn close_relay(&mut self, durable: &mut DurableState) {
        let registered = durable.is_registered();
        let outputs = &mut self.outputs;
        guarded_step(durable, &mut self.watchdog, RecoveryTag::RelayOn, || {
            if registered {
                outputs.set_relay(true);
            }
            outputs.settle(SETTLE_DELAY);
        });
    }

    fn set_overcurrent_irq(&mut self, enabled: bool) {
        self.overcurrent_irq = enabled;
        self.outputs.set_overcurrent_irq(enabled);
    }
}

/// Applies a state-change request. Returns `false` for values outside the requestable range.
pub fn request_target(durable: &mut DurableState, raw: u8) -> bool {
    match ModuleState::from_request(raw) {
        Some(state) => {
            durable.set_target(state);
            true
        }
        None => false,
    }
}

/// Applies a max-state heartbeat, pulling `target` down when `current` is above it.
pub fn request_max(durable: &mut DurableState, raw: u8) -> bool {
    match ModuleState::from_request(raw) {
        Some(state) => {
            durable.set_max(state);
            if durable.current() > state {
                durable.set_target(state);
            }
            true
        }
        None => false,
    }
}
