//! Interfaces to the peripherals the node drives but does not own.
//!
//! Each trait is implemented once by the firmware's HAL adapters and once by
//! the [`sim`] doubles used in tests and the emulator.

pub mod sim;

use core::fmt;

use crate::frame::{CellAcquisition, FrameRecord, TOTAL_CELL_COUNT_MAX};
use crate::protocol::payload::{
    DEFAULT_MAX_CHARGE_CURRENT, DEFAULT_MAX_DISCHARGE_CURRENT, programmed_or,
};

/// Control word broadcast down the cell chain to start an acquisition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionRequest {
    /// Every cell reports voltage and temperature.
    Report,
    /// Cells end any balancing discharge.
    StopDischarge,
}

impl AcquisitionRequest {
    const REPORT_FLAG: u16 = 0x8000;
    const STOP_DISCHARGE: u16 = 0x03ff;

    #[must_use]
    pub const fn to_word(self) -> u16 {
        match self {
            AcquisitionRequest::Report => Self::REPORT_FLAG,
            AcquisitionRequest::StopDischarge => Self::STOP_DISCHARGE,
        }
    }
}

/// Bit-level serial link to the cell sensor chain.
pub trait CellLinkDriver {
    /// Switches the sensor chain supply.
    fn set_power(&mut self, on: bool);

    /// Broadcasts `request`; replies stream back until the next collect.
    fn request_acquisition(&mut self, request: AcquisitionRequest);

    /// Drains every byte received since the request into `acquisition`.
    fn collect(&mut self, acquisition: &mut CellAcquisition);
}

/// Analog sampling driver. Readings arrive through the node's ADC callback.
pub trait AdcDriver {
    /// Starts a pass over every channel.
    fn start_conversion(&mut self);
}

/// Append-only frame log.
pub trait FrameStorage {
    type Error: fmt::Debug;

    /// # Errors
    ///
    /// Returns the backend error when no session could be opened.
    fn start_session(&mut self) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns the backend error when the frame was not persisted.
    fn write_frame(&mut self, frame: &FrameRecord) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns the backend error when the session could not be closed cleanly.
    fn end_session(&mut self) -> Result<(), Self::Error>;
}

/// Failures reported by frame storage backends.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageError {
    /// No medium is attached.
    NotPresent,
    /// A write was attempted outside a session.
    NoSession,
    /// The medium rejected the write.
    WriteFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageError::NotPresent => "storage not present",
            StorageError::NoSession => "no storage session open",
            StorageError::WriteFailed => "storage write failed",
        })
    }
}

/// Wall-clock time in seconds, set by the pack controller.
pub trait ClockSource {
    fn now(&self) -> Option<u64>;

    fn set(&mut self, seconds: u64);
}

/// Byte-addressed non-volatile parameter memory.
pub trait ByteStore {
    fn read(&self, address: u16) -> u8;
}

/// Parameters programmed at manufacture.
pub trait PersistentConfig {
    fn unique_id(&self) -> u32;

    /// Cells the module is built with, clipped to [`TOTAL_CELL_COUNT_MAX`].
    fn expected_cell_count(&self) -> u8;

    /// Raw 0.02 A floor-relative charge limit; 0 or 0xffff when unprogrammed.
    fn max_charge_current(&self) -> u16;

    fn max_discharge_current(&self) -> u16;

    /// Consecutive cell count mismatches before the chain is power cycled.
    fn mismatch_threshold(&self) -> u8;
}

/// Parameter layout in the byte store.
pub mod layout {
    pub const UNIQUE_ID: u16 = 0x00;
    pub const EXPECTED_CELL_COUNT: u16 = 0x04;
    pub const MAX_CHARGE_CURRENT: u16 = 0x05;
    pub const MAX_DISCHARGE_CURRENT: u16 = 0x07;
    pub const MISMATCH_THRESHOLD: u16 = 0x09;
    /// Bytes covered by the layout.
    pub const LEN: usize = 0x0a;
}

/// [`PersistentConfig`] decoded from a [`ByteStore`].
pub struct EepromConfig<S> {
    store: S,
}

impl<S> EepromConfig<S>
where
    S: ByteStore,
{
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn read_u16(&self, address: u16) -> u16 {
        u16::from_le_bytes([self.store.read(address), self.store.read(address + 1)])
    }
}

impl<S> PersistentConfig for EepromConfig<S>
where
    S: ByteStore,
{
    fn unique_id(&self) -> u32 {
        let mut bytes = [0; 4];
        for (offset, byte) in (0u16..).zip(bytes.iter_mut()) {
            *byte = self.store.read(layout::UNIQUE_ID + offset);
        }
        u32::from_le_bytes(bytes)
    }

    fn expected_cell_count(&self) -> u8 {
        self.store
            .read(layout::EXPECTED_CELL_COUNT)
            .min(TOTAL_CELL_COUNT_MAX)
    }

    fn max_charge_current(&self) -> u16 {
        self.read_u16(layout::MAX_CHARGE_CURRENT)
    }

    fn max_discharge_current(&self) -> u16 {
        self.read_u16(layout::MAX_DISCHARGE_CURRENT)
    }

    fn mismatch_threshold(&self) -> u8 {
        self.store.read(layout::MISMATCH_THRESHOLD)
    }
}

/// Problems found in the programmed parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The unique id reads as erased memory.
    UnprogrammedId,
    /// No expected cell count is programmed; the mismatch check stays off.
    NoCellCount,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigError::UnprogrammedId => "unique id not programmed",
            ConfigError::NoCellCount => "expected cell count not programmed",
        })
    }
}

/// Parameters read once at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigSnapshot {
    pub unique_id: u32,
    pub expected_cells: u8,
    pub max_charge_current: u16,
    pub max_discharge_current: u16,
    pub mismatch_threshold: u8,
}

impl ConfigSnapshot {
    #[must_use]
    pub fn load<C>(config: &C) -> Self
    where
        C: PersistentConfig + ?Sized,
    {
        Self {
            unique_id: config.unique_id(),
            expected_cells: config.expected_cell_count(),
            max_charge_current: config.max_charge_current(),
            max_discharge_current: config.max_discharge_current(),
            mismatch_threshold: config.mismatch_threshold(),
        }
    }

    /// Checks for values that indicate an unprogrammed part.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. The node still runs with the values as read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unique_id == u32::MAX {
            return Err(ConfigError::UnprogrammedId);
        }
        if self.expected_cells == 0 {
            return Err(ConfigError::NoCellCount);
        }
        Ok(())
    }

    /// Charge limit for reports, with the default for unprogrammed values.
    #[must_use]
    pub const fn effective_max_charge(&self) -> u16 {
        programmed_or(self.max_charge_current, DEFAULT_MAX_CHARGE_CURRENT)
    }

    #[must_use]
    pub const fn effective_max_discharge(&self) -> u16 {
        programmed_or(self.max_discharge_current, DEFAULT_MAX_DISCHARGE_CURRENT)
    }
}

impl fmt::Display for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={:08x} cells={} charge={} discharge={} mismatch={}",
            self.unique_id,
            self.expected_cells,
            self.effective_max_charge(),
            self.effective_max_discharge(),
            self.mismatch_threshold,
        )
    }
}
