//! Board adapters implementing the `module-core` hardware traits.
//!
//! Pin assignment (STM32G0B1KE):
//!
//! | Function              | Pin / peripheral |
//! |-----------------------|------------------|
//! | Relay enable          | PB0              |
//! | Switch enable         | PB1              |
//! | Analog supply         | PA8              |
//! | Cell chain supply     | PA15             |
//! | Overcurrent status    | PB4 (EXTI4)      |
//! | Aux supply good       | PB5 (EXTI5)      |
//! | Cell chain serial     | USART1 PB6/PB7   |
//! | Debug console         | USART2 PA2/PA3   |
//! | Bus                   | FDCAN1 PA11/PA12 |
//! | Analog inputs         | ADC1 PA0/PA1/PA4/PA5/PA6 |

pub mod adc;
pub mod can;
pub mod cell_link;
pub mod flash;
pub mod power;

use embassy_stm32::pac;
use embassy_time::Instant;
use module_core::collaborators::{ClockSource, FrameStorage, StorageError};
use module_core::durable::ResetCause;
use module_core::frame::FrameRecord;
use module_core::node::Board;

/// The production board.
pub struct Hardware;

impl Board for Hardware {
    type Outputs = power::BoardOutputs;
    type Watchdog = power::IwdgWatchdog;
    type CellLink = cell_link::UartCellLink;
    type Adc = adc::SignalledAdc;
    type Storage = DetachedStorage;
    type Clock = UptimeClock;
    type Can = can::FdcanController;
}

/// Reads and clears the reset flags.
///
/// The pin flag is set on every reset because the reset pulse is driven out
/// on NRST, so it is checked last.
pub fn take_reset_cause() -> ResetCause {
    let flags = pac::RCC.csr().read();
    let cause = if flags.iwdgrstf() || flags.wwdgrstf() {
        ResetCause::Watchdog
    } else if flags.sftrstf() {
        ResetCause::Software
    } else if flags.pwrrstf() {
        ResetCause::PowerOn
    } else if flags.pinrstf() {
        ResetCause::External
    } else {
        ResetCause::Unknown
    };
    pac::RCC.csr().modify(|w| w.set_rmvf(true));
    cause
}

/// Wall clock derived from uptime once the pack controller has set it.
pub struct UptimeClock {
    epoch: Option<(u64, Instant)>,
}

impl UptimeClock {
    pub const fn new() -> Self {
        Self { epoch: None }
    }
}

impl ClockSource for UptimeClock {
    fn now(&self) -> Option<u64> {
        self.epoch
            .map(|(seconds, set_at)| seconds.saturating_add(set_at.elapsed().as_secs()))
    }

    fn set(&mut self, seconds: u64) {
        self.epoch = Some((seconds, Instant::now()));
    }
}

/// This board revision has no frame log medium fitted.
pub struct DetachedStorage;

impl FrameStorage for DetachedStorage {
    type Error = StorageError;

    fn start_session(&mut self) -> Result<(), StorageError> {
        Err(StorageError::NotPresent)
    }

    fn write_frame(&mut self, _frame: &FrameRecord) -> Result<(), StorageError> {
        Err(StorageError::NotPresent)
    }

    fn end_session(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
