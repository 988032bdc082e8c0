//! Power stage outputs and the independent watchdog.
//!
//! The relay and switch pins live behind [`POWER_STAGE`] so the fault task,
//! running on the interrupt executor, can open them while the node task is
//! blocked in a settle delay.

use core::cell::RefCell;
use core::time::Duration;

use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::pac;
use embassy_stm32::pac::iwdg::vals::{Key, Pr};
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use module_core::durable::{Watchdog, WatchdogLeash};
use module_core::power::PowerOutputs;

use crate::faults::FaultLatch;
use crate::watchdog::IwdgTiming;

/// Overcurrent status input; the line reads low while the sensor latches.
const OVERCURRENT_PIN: usize = 4;

pub static FAULTS: FaultLatch = FaultLatch::new();

pub struct StagePins {
    relay: Output<'static>,
    switch: Output<'static>,
}

pub static POWER_STAGE: Mutex<CriticalSectionRawMutex, RefCell<Option<StagePins>>> =
    Mutex::new(RefCell::new(None));

fn with_stage<R>(f: impl FnOnce(&mut StagePins) -> R) -> Option<R> {
    POWER_STAGE.lock(|stage| stage.borrow_mut().as_mut().map(f))
}

/// Opens the switch from interrupt context.
pub fn open_switch() {
    with_stage(|pins| pins.switch.set_low());
}

/// Opens the switch and then the relay from interrupt context.
pub fn open_stage() {
    with_stage(|pins| {
        pins.switch.set_low();
        pins.relay.set_low();
    });
}

fn overcurrent_line_low() -> bool {
    pac::GPIOB.idr().read().idr(OVERCURRENT_PIN) == pac::gpio::vals::Idr::LOW
}

pub struct BoardOutputs {
    analog: Output<'static>,
}

impl BoardOutputs {
    pub fn new(relay: Output<'static>, switch: Output<'static>, analog: Output<'static>) -> Self {
        POWER_STAGE.lock(|stage| *stage.borrow_mut() = Some(StagePins { relay, switch }));
        Self { analog }
    }
}

fn level(asserted: bool) -> Level {
    if asserted { Level::High } else { Level::Low }
}

impl PowerOutputs for BoardOutputs {
    fn set_relay(&mut self, asserted: bool) {
        with_stage(|pins| pins.relay.set_level(level(asserted)));
    }

    fn relay_asserted(&self) -> bool {
        with_stage(|pins| pins.relay.is_set_high()).unwrap_or(false)
    }

    fn set_switch(&mut self, asserted: bool) {
        with_stage(|pins| pins.switch.set_level(level(asserted)));
    }

    fn set_overcurrent_irq(&mut self, enabled: bool) {
        FAULTS.arm_overcurrent(enabled);
    }

    // Sampled from the pin so a precharge pulse sees the latch without
    // waiting on the fault task.
    fn overcurrent_latched(&self) -> bool {
        overcurrent_line_low() || FAULTS.tripped()
    }

    fn set_analog_power(&mut self, on: bool) {
        self.analog.set_level(level(on));
    }

    fn settle(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        embassy_time::block_for(embassy_time::Duration::from_micros(micros));
    }
}

/// IWDG wrapper. The HAL starts the peripheral; leash changes rewrite the
/// prescaler and reload registers directly.
pub struct IwdgWatchdog {
    inner: IndependentWatchdog<'static, IWDG>,
    leash: WatchdogLeash,
}

impl IwdgWatchdog {
    pub fn new(mut inner: IndependentWatchdog<'static, IWDG>) -> Self {
        inner.unleash();
        Self {
            inner,
            leash: WatchdogLeash::Long,
        }
    }

    fn wait_for_update() {
        loop {
            let sr = pac::IWDG.sr().read();
            if !sr.pvu() && !sr.rvu() {
                return;
            }
        }
    }

    fn program(timing: IwdgTiming) {
        let iwdg = pac::IWDG;
        Self::wait_for_update();
        iwdg.kr().write(|w| w.set_key(Key::ENABLE));
        iwdg.pr().write(|w| w.set_pr(Pr::from_bits(timing.prescaler)));
        iwdg.rlr().write(|w| w.set_rl(timing.reload));
        Self::wait_for_update();
        iwdg.kr().write(|w| w.set_key(Key::RESET));
    }
}

impl Watchdog for IwdgWatchdog {
    fn set_leash(&mut self, leash: WatchdogLeash) {
        if leash == self.leash {
            self.inner.pet();
            return;
        }
        match IwdgTiming::for_leash(leash) {
            Some(timing) => {
                Self::program(timing);
                self.leash = leash;
            }
            None => {
                defmt::error!("watchdog: leash out of range");
                self.inner.pet();
            }
        }
    }

    fn feed(&mut self) {
        self.inner.pet();
    }
}

/// Watchdog timeout the IWDG is created with.
pub fn long_leash_micros() -> u32 {
    u32::try_from(WatchdogLeash::Long.timeout().as_micros()).unwrap_or(u32::MAX)
}
