//! IWDG prescaler and reload selection for each watchdog leash.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use module_core::durable::WatchdogLeash;

/// LSI clock feeding the IWDG on the G0 family.
pub const LSI_HZ: u32 = 32_000;

/// Largest value the 12-bit reload register holds.
pub const MAX_RELOAD: u16 = 0x0fff;

/// Highest prescaler register value (divide by 256).
const MAX_PRESCALER: u8 = 6;

/// Register values that give one watchdog timeout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IwdgTiming {
    /// `IWDG_PR` value; the clock is divided by `4 << prescaler`.
    pub prescaler: u8,
    /// `IWDG_RLR` value; the countdown runs `reload + 1` divided ticks.
    pub reload: u16,
}

impl IwdgTiming {
    /// Smallest prescaler that fits `timeout`, so the period stays as close
    /// to the request as the reload resolution allows.
    #[must_use]
    pub fn for_timeout(timeout: Duration) -> Option<Self> {
        let lsi_ticks = timeout.as_micros() * u128::from(LSI_HZ) / 1_000_000;
        (0..=MAX_PRESCALER).find_map(|prescaler| {
            let ticks = lsi_ticks / u128::from(Self::divider_of(prescaler));
            let reload = u16::try_from(ticks.checked_sub(1)?).ok()?;
            (reload <= MAX_RELOAD).then_some(Self { prescaler, reload })
        })
    }

    #[must_use]
    pub fn for_leash(leash: WatchdogLeash) -> Option<Self> {
        Self::for_timeout(leash.timeout())
    }

    #[must_use]
    pub const fn divider(self) -> u32 {
        Self::divider_of(self.prescaler)
    }

    /// Time from a reload to the reset.
    #[must_use]
    pub fn period(self) -> Duration {
        let ticks = u64::from(self.reload) + 1;
        Duration::from_micros(ticks * u64::from(self.divider()) * 1_000_000 / u64::from(LSI_HZ))
    }

    const fn divider_of(prescaler: u8) -> u32 {
        4 << prescaler
    }
}
