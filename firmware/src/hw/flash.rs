//! Manufacturing parameters kept in the last flash page.

use embassy_stm32::Peri;
use embassy_stm32::flash::Flash;
use embassy_stm32::peripherals::FLASH;
use module_core::collaborators::{ByteStore, layout};

/// Offset of the parameter page from the start of flash (page 255 of 256).
pub const PARAMETER_PAGE: u32 = 0x7_f800;

/// Copy of the parameter bytes taken at boot.
pub struct ParameterPage {
    bytes: [u8; layout::LEN],
}

impl ParameterPage {
    /// Reads the page. A failed read leaves the bytes erased.
    pub fn read(flash: Peri<'static, FLASH>) -> Self {
        let mut flash = Flash::new_blocking(flash);
        let mut bytes = [0xff; layout::LEN];
        if flash.blocking_read(PARAMETER_PAGE, &mut bytes).is_err() {
            defmt::warn!("config: parameter page read failed");
            bytes = [0xff; layout::LEN];
        }
        Self { bytes }
    }
}

impl ByteStore for ParameterPage {
    fn read(&self, address: u16) -> u8 {
        self.bytes.get(usize::from(address)).copied().unwrap_or(0xff)
    }
}
