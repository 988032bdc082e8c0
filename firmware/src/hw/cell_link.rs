//! Serial link to the cell sensor chain.
//!
//! The cell task owns the UART. Requests go out through a signal; reply
//! bytes are queued in a pipe until the node collects them.

use embassy_stm32::gpio::{Level, Output};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use module_core::collaborators::{AcquisitionRequest, CellLinkDriver};
use module_core::frame::CellAcquisition;

/// Reply bytes for one acquisition; the longest chain answers 94 cells of four bytes.
pub const REPLY_BUFFER: usize = 512;

pub static REQUESTS: Signal<CriticalSectionRawMutex, u16> = Signal::new();
pub static REPLIES: Pipe<CriticalSectionRawMutex, REPLY_BUFFER> = Pipe::new();

pub struct UartCellLink {
    power: Output<'static>,
}

impl UartCellLink {
    pub fn new(power: Output<'static>) -> Self {
        Self { power }
    }
}

impl CellLinkDriver for UartCellLink {
    fn set_power(&mut self, on: bool) {
        self.power
            .set_level(if on { Level::High } else { Level::Low });
    }

    fn request_acquisition(&mut self, request: AcquisitionRequest) {
        REPLIES.clear();
        REQUESTS.signal(request.to_word());
    }

    fn collect(&mut self, acquisition: &mut CellAcquisition) {
        let mut chunk = [0u8; 32];
        while let Ok(count) = REPLIES.try_read(&mut chunk) {
            for byte in &chunk[..count] {
                acquisition.push(*byte);
            }
        }
    }
}
