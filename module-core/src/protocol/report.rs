//! Status reporting to the pack controller.
//!
//! Each pass offers the pending reports to the transport in a fixed order.
//! The transport carries one message at a time, so most passes send at most
//! one frame; a report stays pending until its send is accepted.

use crate::frame::FrameRecord;
use crate::power::ModuleState;
use crate::transport::{Outbound, OutboundKind};

use super::payload::{self, Status1};
use super::registration::CELL_DETAIL_ALL;

/// Sub-messages in one status cycle.
const STATUS_MESSAGES: u8 = 3;

/// Inputs the reports are built from.
#[derive(Copy, Clone, Debug)]
pub struct ReportContext<'a> {
    pub frame: &'a FrameRecord,
    pub state: ModuleState,
    pub state_of_charge: u8,
    pub state_of_health: u8,
    pub max_charge_current: u16,
    pub max_discharge_current: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct CellRange {
    next: u8,
    target: u8,
}

/// What one [`StatusReportPipeline::run`] pass accomplished.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReportRun {
    pub sent: u8,
    pub cycle_completed: bool,
}

/// Pending report flags and cursors.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusReportPipeline {
    time_request: bool,
    status_cursor: Option<u8>,
    comm_stats: bool,
    hardware_detail: bool,
    cells: Option<CellRange>,
}

impl StatusReportPipeline {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            time_request: false,
            status_cursor: None,
            comm_stats: false,
            hardware_detail: false,
            cells: None,
        }
    }

    /// Starts a Status1..3 cycle. A start while a cycle is in flight is ignored.
    pub fn start_cycle(&mut self) -> bool {
        if self.status_cursor.is_some() {
            return false;
        }
        self.status_cursor = Some(0);
        true
    }

    /// Drops a cycle in flight so the next start is honoured.
    pub fn abandon_cycle(&mut self) {
        self.status_cursor = None;
    }

    #[must_use]
    pub const fn cycle_in_flight(&self) -> bool {
        self.status_cursor.is_some()
    }

    pub fn request_time(&mut self) {
        self.time_request = true;
    }

    pub fn request_comm_stats(&mut self) {
        self.comm_stats = true;
    }

    pub fn request_hardware_detail(&mut self) {
        self.hardware_detail = true;
    }

    /// Schedules cell detail reports starting at `index`, or every cell for
    /// [`CELL_DETAIL_ALL`]. Ignored while a range is still being sent.
    pub fn request_cells(&mut self, index: u8, expected_cells: u8) -> bool {
        if self.cells.is_some() {
            return false;
        }
        self.cells = if index == CELL_DETAIL_ALL {
            Some(CellRange {
                next: 0,
                target: expected_cells,
            })
        } else if index < expected_cells {
            Some(CellRange {
                next: index,
                target: index,
            })
        } else {
            None
        };
        self.cells.is_some()
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !self.time_request
            && self.status_cursor.is_none()
            && !self.comm_stats
            && !self.hardware_detail
            && self.cells.is_none()
    }

    /// Offers every pending report to `out`, in priority order.
    pub fn run<O>(&mut self, out: &mut O, context: &ReportContext<'_>) -> ReportRun
    where
        O: Outbound + ?Sized,
    {
        let mut sent = 0u8;
        let mut cycle_completed = false;
        let mut send = |kind, payload: payload::Payload| {
            let accepted = out.send(kind, &payload).is_ok();
            if accepted {
                sent += 1;
            }
            accepted
        };

        if self.time_request && send(OutboundKind::RequestTime, payload::time_request()) {
            self.time_request = false;
        }

        if let Some(cursor) = self.status_cursor {
            let (kind, body) = match cursor {
                0 => (OutboundKind::Status1, status1(context)),
                1 => (OutboundKind::Status2, payload::status2(context.frame)),
                _ => (OutboundKind::Status3, payload::status3(context.frame)),
            };
            if send(kind, body) {
                if cursor + 1 >= STATUS_MESSAGES {
                    self.status_cursor = None;
                    self.comm_stats = true;
                    cycle_completed = true;
                } else {
                    self.status_cursor = Some(cursor + 1);
                }
            }
        }

        if let Some(range) = self.cells {
            let frame = context.frame;
            match frame.cell_detail(range.next) {
                Some(detail) => {
                    let body = payload::cell_detail(&detail, frame.expected_cells);
                    if send(OutboundKind::CellDetail, body) {
                        let next = range.next.saturating_add(1);
                        self.cells = (next < range.target).then_some(CellRange { next, ..range });
                    }
                }
                None => self.cells = None,
            }
        }

        if self.comm_stats && send(OutboundKind::CellCommStat1, payload::comm_stats(context.frame)) {
            self.comm_stats = false;
        }

        if self.hardware_detail
            && send(
                OutboundKind::HardwareDetail,
                payload::hardware_detail(context.max_charge_current, context.max_discharge_current),
            )
        {
            self.hardware_detail = false;
        }

        ReportRun {
            sent,
            cycle_completed,
        }
    }
}

fn status1(context: &ReportContext<'_>) -> payload::Payload {
    let frame = context.frame;
    Status1 {
        state: context.state,
        state_of_charge: context.state_of_charge,
        state_of_health: context.state_of_health,
        expected_cells: frame.expected_cells,
        current: frame.reported_current(context.state == ModuleState::On),
        string_voltage: frame.string_voltage_units(),
    }
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CellAcquisition, CURRENT_ZERO};
    use crate::transport::SendError;

    /// Accepts `budget` sends, then reports busy.
    struct Budgeted {
        budget: usize,
        sent: [Option<OutboundKind>; 16],
        count: usize,
    }

    impl Budgeted {
        fn new(budget: usize) -> Self {
            Self {
                budget,
                sent: [None; 16],
                count: 0,
            }
        }

        fn kinds(&self) -> impl Iterator<Item = OutboundKind> + '_ {
            self.sent[..self.count].iter().flatten().copied()
        }
    }

    impl Outbound for Budgeted {
        fn send(&mut self, kind: OutboundKind, _payload: &[u8]) -> Result<(), SendError> {
            if self.budget == 0 {
                return Err(SendError::Busy);
            }
            self.budget -= 1;
            self.sent[self.count] = Some(kind);
            self.count += 1;
            Ok(())
        }
    }

    fn context(frame: &FrameRecord) -> ReportContext<'_> {
        ReportContext {
            frame,
            state: ModuleState::Standby,
            state_of_charge: 0,
            state_of_health: 0,
            max_charge_current: 0,
            max_discharge_current: 0,
        }
    }

    #[test]
    fn cycle_sends_three_status_messages_then_comm_stats() {
        let frame = FrameRecord::new(1, 4);
        let mut pipeline = StatusReportPipeline::new();
        assert!(pipeline.start_cycle());
        assert!(!pipeline.start_cycle());

        let mut out = Budgeted::new(1);
        let mut completed = false;
        for _ in 0..4 {
            out.budget = 1;
            completed |= pipeline.run(&mut out, &context(&frame)).cycle_completed;
        }
        assert!(completed);
        assert!(pipeline.is_idle());
        let kinds: [OutboundKind; 4] = [
            OutboundKind::Status1,
            OutboundKind::Status2,
            OutboundKind::Status3,
            OutboundKind::CellCommStat1,
        ];
        assert!(out.kinds().eq(kinds));
    }

    #[test]
    fn busy_transport_retries_same_status_index() {
        let frame = FrameRecord::new(1, 4);
        let mut pipeline = StatusReportPipeline::new();
        pipeline.start_cycle();

        let mut out = Budgeted::new(0);
        assert_eq!(pipeline.run(&mut out, &context(&frame)), ReportRun::default());
        out.budget = 1;
        pipeline.run(&mut out, &context(&frame));
        assert_eq!(out.kinds().next(), Some(OutboundKind::Status1));
        assert!(pipeline.cycle_in_flight());
    }

    #[test]
    fn time_request_goes_first() {
        let frame = FrameRecord::new(1, 4);
        let mut pipeline = StatusReportPipeline::new();
        pipeline.request_hardware_detail();
        pipeline.request_time();
        pipeline.start_cycle();

        let mut out = Budgeted::new(1);
        pipeline.run(&mut out, &context(&frame));
        assert_eq!(out.kinds().next(), Some(OutboundKind::RequestTime));
    }

    #[test]
    fn all_cells_request_walks_received_cells() {
        let mut frame = FrameRecord::new(1, 3);
        let mut acquisition = CellAcquisition::new();
        for _ in 0..3 {
            for byte in [0x47, 0x03, 0x5f, 0x81] {
                acquisition.push(byte);
            }
        }
        frame.process(&acquisition);

        let mut pipeline = StatusReportPipeline::new();
        assert!(pipeline.request_cells(CELL_DETAIL_ALL, frame.expected_cells));
        let mut out = Budgeted::new(16);
        for _ in 0..5 {
            pipeline.run(&mut out, &context(&frame));
        }
        assert_eq!(
            out.kinds().filter(|kind| *kind == OutboundKind::CellDetail).count(),
            3
        );
        assert!(pipeline.is_idle());
    }

    #[test]
    fn single_cell_request_sends_one_report() {
        let mut frame = FrameRecord::new(1, 3);
        let mut acquisition = CellAcquisition::new();
        for _ in 0..3 {
            for byte in [0x47, 0x03, 0x5f, 0x81] {
                acquisition.push(byte);
            }
        }
        frame.process(&acquisition);

        let mut pipeline = StatusReportPipeline::new();
        assert!(pipeline.request_cells(1, frame.expected_cells));
        assert!(!pipeline.request_cells(2, frame.expected_cells));
        let mut out = Budgeted::new(16);
        pipeline.run(&mut out, &context(&frame));
        pipeline.run(&mut out, &context(&frame));
        assert_eq!(out.kinds().count(), 1);
    }

    #[test]
    fn cell_request_beyond_received_resets_cursor() {
        let frame = FrameRecord::new(1, 3);
        let mut pipeline = StatusReportPipeline::new();
        assert!(pipeline.request_cells(2, 3));
        let mut out = Budgeted::new(16);
        pipeline.run(&mut out, &context(&frame));
        assert_eq!(out.kinds().count(), 0);
        assert!(pipeline.is_idle());
        assert!(!pipeline.request_cells(3, 3));
    }

    #[test]
    fn status1_reports_zero_current_unless_on() {
        let mut frame = FrameRecord::new(1, 3);
        frame.record_adc(crate::frame::AdcChannel::Current, 600);
        frame.record_adc(crate::frame::AdcChannel::CurrentReference, 512);
        frame.current = 40_000;

        let mut standby = context(&frame);
        let payload = status1(&standby);
        assert_eq!(u16::from_le_bytes([payload[4], payload[5]]), CURRENT_ZERO);

        standby.state = ModuleState::On;
        let payload = status1(&standby);
        assert_eq!(u16::from_le_bytes([payload[4], payload[5]]), 40_000);
    }
}
