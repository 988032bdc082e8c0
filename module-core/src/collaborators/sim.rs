//! Software doubles for the peripheral collaborators.

use heapless::Vec;

use super::{
    AcquisitionRequest, AdcDriver, ByteStore, CellLinkDriver, ClockSource, FrameStorage,
    StorageError, layout,
};
use crate::frame::{CellAcquisition, CellSample, FrameRecord, MAX_CELLS};

/// Cell chain that answers every acquisition with a programmed set of cells.
#[derive(Debug, Default)]
pub struct SimulatedCellLink {
    powered: bool,
    cells: Vec<CellSample, MAX_CELLS>,
    trailing_bytes: u8,
    requested: Option<AcquisitionRequest>,
    requests: u32,
    stop_discharge_requests: u32,
    power_cycles: u32,
}

impl SimulatedCellLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cells that answer; extra samples past the buffer are dropped.
    pub fn set_cells(&mut self, cells: &[CellSample]) {
        self.cells.clear();
        for cell in cells.iter().take(MAX_CELLS) {
            let _ = self.cells.push(*cell);
        }
    }

    /// Fills the chain with `count` identical healthy cells.
    pub fn set_uniform_cells(&mut self, count: usize, sample: CellSample) {
        self.cells.clear();
        for _ in 0..count.min(MAX_CELLS) {
            let _ = self.cells.push(sample);
        }
    }

    /// Appends stray bytes after the cells, producing a framing error.
    pub fn set_trailing_bytes(&mut self, count: u8) {
        self.trailing_bytes = count;
    }

    #[must_use]
    pub fn powered(&self) -> bool {
        self.powered
    }

    #[must_use]
    pub fn requests(&self) -> u32 {
        self.requests
    }

    #[must_use]
    pub fn stop_discharge_requests(&self) -> u32 {
        self.stop_discharge_requests
    }

    /// Times the chain was switched from off to on.
    #[must_use]
    pub fn power_cycles(&self) -> u32 {
        self.power_cycles
    }
}

impl CellLinkDriver for SimulatedCellLink {
    fn set_power(&mut self, on: bool) {
        if on && !self.powered {
            self.power_cycles += 1;
        }
        self.powered = on;
    }

    fn request_acquisition(&mut self, request: AcquisitionRequest) {
        self.requests += 1;
        if request == AcquisitionRequest::StopDischarge {
            self.stop_discharge_requests += 1;
        }
        self.requested = Some(request);
    }

    fn collect(&mut self, acquisition: &mut CellAcquisition) {
        if self.requested.take().is_none() || !self.powered {
            return;
        }
        for cell in &self.cells {
            for byte in cell
                .voltage
                .to_le_bytes()
                .into_iter()
                .chain(cell.temperature.to_le_bytes())
            {
                acquisition.push(byte);
            }
        }
        for _ in 0..self.trailing_bytes {
            acquisition.push(0);
        }
    }
}

/// ADC that only counts conversion starts; readings are injected by the harness.
#[derive(Debug, Default)]
pub struct SimulatedAdc {
    started: u32,
}

impl SimulatedAdc {
    #[must_use]
    pub const fn new() -> Self {
        Self { started: 0 }
    }

    #[must_use]
    pub const fn started(&self) -> u32 {
        self.started
    }
}

impl AdcDriver for SimulatedAdc {
    fn start_conversion(&mut self) {
        self.started += 1;
    }
}

/// Frame log held in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    session_open: bool,
    sessions: u32,
    frames: u32,
    fail_writes: bool,
    last_frame_cells: u8,
}

impl MemoryStorage {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_open: false,
            sessions: 0,
            frames: 0,
            fail_writes: false,
            last_frame_cells: 0,
        }
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    #[must_use]
    pub const fn session_open(&self) -> bool {
        self.session_open
    }

    #[must_use]
    pub const fn sessions(&self) -> u32 {
        self.sessions
    }

    #[must_use]
    pub const fn frames(&self) -> u32 {
        self.frames
    }

    #[must_use]
    pub const fn last_frame_cells(&self) -> u8 {
        self.last_frame_cells
    }
}

impl FrameStorage for MemoryStorage {
    type Error = StorageError;

    fn start_session(&mut self) -> Result<(), StorageError> {
        self.session_open = true;
        self.sessions += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &FrameRecord) -> Result<(), StorageError> {
        if !self.session_open {
            return Err(StorageError::NoSession);
        }
        if self.fail_writes {
            return Err(StorageError::WriteFailed);
        }
        self.frames += 1;
        self.last_frame_cells = frame.cell_count;
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), StorageError> {
        self.session_open = false;
        Ok(())
    }
}

/// Clock that is unset until the pack controller supplies the time.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    seconds: Option<u64>,
}

impl SimulatedClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { seconds: None }
    }

    /// Moves time forward by whole seconds.
    pub fn advance(&mut self, seconds: u64) {
        if let Some(now) = self.seconds.as_mut() {
            *now = now.saturating_add(seconds);
        }
    }
}

impl ClockSource for SimulatedClock {
    fn now(&self) -> Option<u64> {
        self.seconds
    }

    fn set(&mut self, seconds: u64) {
        self.seconds = Some(seconds);
    }
}

/// Parameter memory backed by an array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemoryByteStore {
    bytes: [u8; layout::LEN],
}

impl MemoryByteStore {
    /// Memory as shipped from the factory: all ones.
    #[must_use]
    pub const fn erased() -> Self {
        Self {
            bytes: [0xff; layout::LEN],
        }
    }

    #[must_use]
    pub fn with_parameters(
        unique_id: u32,
        expected_cells: u8,
        max_charge: u16,
        max_discharge: u16,
        mismatch_threshold: u8,
    ) -> Self {
        let mut bytes = [0; layout::LEN];
        bytes[0..4].copy_from_slice(&unique_id.to_le_bytes());
        bytes[4] = expected_cells;
        bytes[5..7].copy_from_slice(&max_charge.to_le_bytes());
        bytes[7..9].copy_from_slice(&max_discharge.to_le_bytes());
        bytes[9] = mismatch_threshold;
        Self { bytes }
    }
}

impl ByteStore for MemoryByteStore {
    fn read(&self, address: u16) -> u8 {
        self.bytes
            .get(usize::from(address))
            .copied()
            .unwrap_or(0xff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_link_answers_only_when_powered_and_requested() {
        let mut link = SimulatedCellLink::new();
        link.set_uniform_cells(2, CellSample {
            voltage: 0x0347,
            temperature: 0x0150,
        });
        let mut acquisition = CellAcquisition::new();

        link.request_acquisition(AcquisitionRequest::Report);
        link.collect(&mut acquisition);
        assert_eq!(acquisition.received(), 0);

        link.set_power(true);
        link.request_acquisition(AcquisitionRequest::Report);
        link.collect(&mut acquisition);
        assert_eq!(acquisition.cell_count(), 2);

        acquisition.begin();
        link.collect(&mut acquisition);
        assert_eq!(acquisition.received(), 0);
    }

    #[test]
    fn storage_rejects_writes_outside_session() {
        let mut storage = MemoryStorage::new();
        let frame = FrameRecord::new(1, 1);
        assert_eq!(storage.write_frame(&frame), Err(StorageError::NoSession));
        storage.start_session().expect("session");
        storage.write_frame(&frame).expect("write");
        assert_eq!(storage.frames(), 1);
    }
}
