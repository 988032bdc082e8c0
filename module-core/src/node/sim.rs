//! Simulated board for host tests and the emulator.

use super::{Board, BoardParts};
use crate::collaborators::sim::{MemoryStorage, SimulatedAdc, SimulatedCellLink, SimulatedClock};
use crate::durable::NoopWatchdog;
use crate::power::sim::SimulatedOutputs;
use crate::transport::sim::SimulatedController;
use crate::transport::{CanFrame, InboundKind, ids};

/// Board made entirely of software doubles.
pub struct SimBoard;

impl Board for SimBoard {
    type Outputs = SimulatedOutputs;
    type Watchdog = NoopWatchdog;
    type CellLink = SimulatedCellLink;
    type Adc = SimulatedAdc;
    type Storage = MemoryStorage;
    type Clock = SimulatedClock;
    type Can = SimulatedController;
}

impl SimBoard {
    #[must_use]
    pub fn parts() -> BoardParts<SimBoard> {
        BoardParts {
            outputs: SimulatedOutputs::new(),
            watchdog: NoopWatchdog::new(),
            cell_link: SimulatedCellLink::new(),
            adc: SimulatedAdc::new(),
            storage: MemoryStorage::new(),
            clock: SimulatedClock::new(),
        }
    }
}

/// Frame as the pack controller would put it on the bus; `None` when the
/// payload does not fit.
#[must_use]
pub fn inbound(kind: InboundKind, sender: u8, payload: &[u8]) -> Option<CanFrame> {
    CanFrame::new(ids::encode_id(kind.to_raw(), sender), payload)
}
