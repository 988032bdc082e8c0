//! One module controller node, composed from the core state machines.
//!
//! [`ModuleController::on_timer_tick`] is the 100 ms tick and only advances
//! counters. [`ModuleController::service`] is the main-loop pass that acts on
//! them: it reports, watches for loss of contact, keeps the bus healthy, and
//! runs the phase-specific frame work. Inbound frames reach the node through
//! its [`MessageHandler`] implementation.

pub mod sim;

use crate::collaborators::{
    AcquisitionRequest, AdcDriver, CellLinkDriver, ClockSource, ConfigSnapshot, FrameStorage,
};
use crate::durable::{BootPath, DurableState, Watchdog, WatchdogLeash};
use crate::frame::{AdcChannel, CellAcquisition, CurrentFilter, FrameRecord};
use crate::power::{self, ModuleState, PowerOutputs, PowerStateMachine, Transition};
use crate::protocol::registration::{self, Address, Announcer, Command};
use crate::protocol::{ReportContext, StatusReportPipeline, payload};
use crate::scheduler::{
    CellStringPowerSequencer, CellStringPowerState, ContactTimer, FrameCycle, MismatchMonitor,
    Phase,
};
use crate::telemetry::{TelemetryEventKind, TelemetryRecorder, Tick};
use crate::transport::{
    AddressedSender, BusDiagnostics, CanController, CanFrame, CanTransport, InboundKind,
    MessageHandler, OutboundKind,
};

/// Hardware a node runs on.
pub trait Board {
    type Outputs: PowerOutputs;
    type Watchdog: Watchdog;
    type CellLink: CellLinkDriver;
    type Adc: AdcDriver;
    type Storage: FrameStorage;
    type Clock: ClockSource;
    type Can: CanController;
}

/// Peripherals the node takes ownership of.
pub struct BoardParts<B: Board> {
    pub outputs: B::Outputs,
    pub watchdog: B::Watchdog,
    pub cell_link: B::CellLink,
    pub adc: B::Adc,
    pub storage: B::Storage,
    pub clock: B::Clock,
}

/// Point-in-time view of the node for the console and logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    pub tick: Tick,
    pub current: ModuleState,
    pub target: ModuleState,
    pub max: ModuleState,
    pub registration: Option<u8>,
    pub phase: Phase,
    pub string_power: CellStringPowerState,
    pub cells_received: u8,
    pub expected_cells: u8,
    pub contact_ticks: u8,
    pub announcement_pending: bool,
    pub storage_session: bool,
    pub watchdog_resets: u16,
    pub relay: bool,
}

impl core::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "t={} state={} target={} max={} ",
            self.tick, self.current, self.target, self.max
        )?;
        match self.registration {
            Some(id) => write!(f, "id={id} ")?,
            None => f.write_str("unregistered ")?,
        }
        write!(
            f,
            "phase={} string={} cells={}/{} contact={} relay={} wdt-resets={}",
            self.phase,
            self.string_power,
            self.cells_received,
            self.expected_cells,
            self.contact_ticks,
            u8::from(self.relay),
            self.watchdog_resets,
        )
    }
}

pub struct ModuleController<'a, B: Board> {
    durable: &'a mut DurableState,
    transport: &'a CanTransport<B::Can>,
    power: PowerStateMachine<B::Outputs, B::Watchdog>,
    cell_link: B::CellLink,
    adc: B::Adc,
    storage: B::Storage,
    clock: B::Clock,
    config: ConfigSnapshot,
    cycle: FrameCycle,
    contact: ContactTimer,
    sequencer: CellStringPowerSequencer,
    mismatch: MismatchMonitor,
    frame: FrameRecord,
    acquisition: CellAcquisition,
    current_filter: CurrentFilter,
    adc_pass_complete: bool,
    reports: StatusReportPipeline,
    announcer: Announcer,
    storage_session: bool,
    bus_off_seen: u16,
    telemetry: TelemetryRecorder,
    tick: Tick,
    new_tick: bool,
}

impl<'a, B: Board> ModuleController<'a, B> {
    pub fn new(
        durable: &'a mut DurableState,
        transport: &'a CanTransport<B::Can>,
        parts: BoardParts<B>,
        config: ConfigSnapshot,
    ) -> Self {
        Self {
            durable,
            transport,
            power: PowerStateMachine::new(parts.outputs, parts.watchdog),
            cell_link: parts.cell_link,
            adc: parts.adc,
            storage: parts.storage,
            clock: parts.clock,
            config,
            cycle: FrameCycle::new(),
            contact: ContactTimer::new(),
            sequencer: CellStringPowerSequencer::new(),
            mismatch: MismatchMonitor::new(),
            frame: FrameRecord::new(config.unique_id, config.expected_cells),
            acquisition: CellAcquisition::new(),
            current_filter: CurrentFilter::default(),
            adc_pass_complete: false,
            reports: StatusReportPipeline::new(),
            announcer: Announcer::new(),
            storage_session: false,
            bus_off_seen: 0,
            telemetry: TelemetryRecorder::new(),
            tick: 0,
            new_tick: false,
        }
    }

    /// Finishes startup along the path chosen from the durable record.
    ///
    /// A resumed node re-runs whatever transition the reset interrupted
    /// before the first tick.
    pub fn boot(&mut self, path: BootPath) {
        if let Err(error) = self.config.validate() {
            self.record(TelemetryEventKind::ConfigInvalid(error));
        }
        self.power.watchdog_mut().set_leash(WatchdogLeash::Long);
        match path {
            BootPath::ColdStart => self.record(TelemetryEventKind::ColdStart),
            BootPath::Resume(tag) => {
                self.record(TelemetryEventKind::Resumed(tag));
                self.run_state_handler();
            }
        }
    }

    /// Timer tick work; counters only. The next [`service`](Self::service)
    /// pass consumes the tick.
    pub fn on_timer_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.new_tick = true;
        self.cycle.on_timer_tick();
        self.contact.on_timer_tick();
        self.sequencer.on_timer_tick();
    }

    /// One main-loop pass. The watchdog is fed on every pass; everything
    /// else runs once per tick, so untimed passes never advance timeouts.
    pub fn service(&mut self) {
        self.power.watchdog_mut().feed();
        if !core::mem::take(&mut self.new_tick) {
            return;
        }

        if self.durable.is_registered() {
            self.run_reports();
        } else {
            self.announcer.on_service();
        }

        if self.contact.take_expired() {
            self.lose_contact();
        }

        self.transport.poll_tx();
        self.transport.check_health();
        let bus_off = self.transport.diagnostics().bus_off_events;
        if bus_off != self.bus_off_seen {
            self.bus_off_seen = bus_off;
            self.record(TelemetryEventKind::BusOff);
        }

        match self.cycle.phase() {
            Phase::Write => {
                if self.cycle.take_frame_start() {
                    self.start_write_frame();
                }
                self.run_state_handler();
            }
            Phase::Read => {
                if self.cycle.take_frame_start() {
                    self.start_read_frame();
                }
            }
        }

        if core::mem::take(&mut self.adc_pass_complete) {
            self.frame.update_current(&mut self.current_filter);
        }
        self.adc.start_conversion();
    }

    /// ADC conversion complete callback.
    pub fn on_adc_reading(&mut self, channel: AdcChannel, reading: u16) {
        if self.frame.record_adc(channel, reading) {
            self.adc_pass_complete = true;
        }
    }

    /// Overcurrent status line edge.
    pub fn overcurrent_edge(&mut self) {
        if self.power.overcurrent_edge(self.durable) {
            self.record(TelemetryEventKind::Overcurrent);
        }
    }

    /// Auxiliary 5 V supply lost.
    pub fn aux_power_lost(&mut self) {
        self.power.aux_power_lost(self.durable);
        self.record(TelemetryEventKind::AuxPowerLost);
    }

    /// Hands a received frame to the transport, which dispatches it back to this node.
    pub fn receive(&mut self, frame: &CanFrame) -> Option<InboundKind> {
        let transport = self.transport;
        transport.receive(frame, self)
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            tick: self.tick,
            current: self.durable.current(),
            target: self.durable.target(),
            max: self.durable.max(),
            registration: self.registration(),
            phase: self.cycle.phase(),
            string_power: self.sequencer.state(),
            cells_received: self.frame.cell_count,
            expected_cells: self.frame.expected_cells,
            contact_ticks: self.contact.ticks(),
            announcement_pending: self.announcer.send_pending() || self.announcer.backoff_pending(),
            storage_session: self.storage_session,
            watchdog_resets: self.durable.watchdog_resets(),
            relay: self.power.outputs().relay_asserted(),
        }
    }

    #[must_use]
    pub fn bus_diagnostics(&self) -> BusDiagnostics {
        self.transport.diagnostics()
    }

    #[must_use]
    pub fn durable(&self) -> &DurableState {
        self.durable
    }

    #[must_use]
    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    #[must_use]
    pub fn frame(&self) -> &FrameRecord {
        &self.frame
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    #[must_use]
    pub fn reports(&self) -> &StatusReportPipeline {
        &self.reports
    }

    #[must_use]
    pub fn sequencer(&self) -> &CellStringPowerSequencer {
        &self.sequencer
    }

    #[must_use]
    pub fn mismatch_streak(&self) -> u8 {
        self.mismatch.streak()
    }

    #[must_use]
    pub fn power(&self) -> &PowerStateMachine<B::Outputs, B::Watchdog> {
        &self.power
    }

    pub fn power_mut(&mut self) -> &mut PowerStateMachine<B::Outputs, B::Watchdog> {
        &mut self.power
    }

    pub fn cell_link_mut(&mut self) -> &mut B::CellLink {
        &mut self.cell_link
    }

    #[must_use]
    pub fn cell_link(&self) -> &B::CellLink {
        &self.cell_link
    }

    #[must_use]
    pub fn adc(&self) -> &B::Adc {
        &self.adc
    }

    pub fn storage_mut(&mut self) -> &mut B::Storage {
        &mut self.storage
    }

    #[must_use]
    pub fn storage(&self) -> &B::Storage {
        &self.storage
    }

    #[must_use]
    pub fn clock(&self) -> &B::Clock {
        &self.clock
    }

    /// Requests a state locally, as a `StateChange` from the pack controller would.
    pub fn request_target(&mut self, state: ModuleState) -> bool {
        power::request_target(self.durable, state.to_raw())
    }

    /// Applies a max state locally, as the `MaxState` heartbeat would.
    pub fn request_max(&mut self, state: ModuleState) -> bool {
        power::request_max(self.durable, state.to_raw())
    }

    /// Opens both outputs on the next handler pass, as `AllIsolate` would.
    pub fn isolate(&mut self) {
        self.durable.set_target(ModuleState::Off);
    }

    /// Schedules an announcement, as `AnnounceRequest` would.
    pub fn request_announcement(&mut self) {
        if let Some(delay) = self
            .announcer
            .schedule(self.config.unique_id, self.durable.is_registered())
        {
            self.record(TelemetryEventKind::AnnouncementScheduled(delay));
        }
    }

    fn registration(&self) -> Option<u8> {
        self.durable
            .is_registered()
            .then_some(self.durable.registration_id())
    }

    fn record(&mut self, event: TelemetryEventKind) {
        self.telemetry.record(event, self.tick);
    }

    fn run_reports(&mut self) {
        let context = ReportContext {
            frame: &self.frame,
            state: self.durable.current(),
            state_of_charge: self.durable.state_of_charge(),
            state_of_health: self.durable.state_of_health(),
            max_charge_current: self.config.max_charge_current,
            max_discharge_current: self.config.max_discharge_current,
        };
        let mut out = AddressedSender::new(self.transport, self.durable.registration_id());
        self.reports.run(&mut out, &context);
    }

    fn lose_contact(&mut self) {
        let was_registered = self.durable.is_registered();
        self.durable.deregister();
        self.reports.abandon_cycle();
        self.announcer.raise();
        self.reports.start_cycle();
        self.durable.set_target(ModuleState::Off);
        if was_registered {
            self.record(TelemetryEventKind::ContactLost);
        }
    }

    fn start_write_frame(&mut self) {
        let was_operational = self.sequencer.is_operational();
        self.step_sequencer();
        self.cell_link.collect(&mut self.acquisition);

        if was_operational {
            self.process_frame();
            if self.sequencer.is_operational()
                && self.mismatch.observe(
                    self.frame.cell_count,
                    self.config.expected_cells,
                    self.config.mismatch_threshold,
                )
            {
                self.sequencer.force_off();
                self.record(TelemetryEventKind::SensorChainReset);
            }
        }

        if self.announcer.send_pending() {
            let body = payload::announcement(self.config.unique_id);
            let sent = self
                .transport
                .send(OutboundKind::Announcement, self.durable.registration_id(), &body);
            if sent.is_ok() {
                self.announcer.sent();
                self.record(TelemetryEventKind::AnnouncementSent);
            }
        }
    }

    fn start_read_frame(&mut self) {
        self.step_sequencer();
        self.frame.reset_cells();
        self.acquisition.begin();
        if self.sequencer.is_operational() {
            let request = if self.power.take_stop_discharge() {
                AcquisitionRequest::StopDischarge
            } else {
                AcquisitionRequest::Report
            };
            self.cell_link.request_acquisition(request);
        }
    }

    fn step_sequencer(&mut self) {
        let step = self.sequencer.step();
        if let Some(on) = step.power {
            self.cell_link.set_power(on);
        }
        if step.clear_data {
            self.frame.reset_cells();
            self.acquisition.begin();
        }
        if step.reset_count_extremes {
            self.frame.reset_count_extremes();
        }
        if step.request_status {
            self.reports.start_cycle();
        }
    }

    fn process_frame(&mut self) {
        self.frame.timestamp = self.clock.now();
        let outcome = self.frame.process(&self.acquisition);
        if outcome.comm_stats_changed {
            self.reports.request_comm_stats();
        }

        let logging = self.storage_session
            && self.durable.is_registered()
            && self.durable.current() != ModuleState::Off;
        if logging && self.storage.write_frame(&self.frame).is_err() {
            self.storage_session = false;
            self.record(TelemetryEventKind::StorageFailed);
        }

        self.reports.start_cycle();
    }

    fn run_state_handler(&mut self) {
        if let Some(transition) = self.power.handle(self.durable) {
            self.record(TelemetryEventKind::StateTransition {
                from: transition.from,
                to: transition.to,
            });
            self.on_transition(transition);
        }
        self.power.clear_overcurrent_signal();
    }

    fn on_transition(&mut self, transition: Transition) {
        match transition.to {
            ModuleState::Off => {
                if core::mem::take(&mut self.storage_session)
                    && self.storage.end_session().is_err()
                {
                    self.record(TelemetryEventKind::StorageFailed);
                }
            }
            ModuleState::Standby => {
                self.storage_session = self.storage.start_session().is_ok();
                if !self.storage_session {
                    self.record(TelemetryEventKind::StorageFailed);
                }
            }
            _ => {}
        }
        self.reports.start_cycle();
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { id } => {
                self.durable.register(id);
                self.contact.refresh();
                self.reports.start_cycle();
                self.reports.request_hardware_detail();
                self.reports.request_time();
                self.announcer.cancel();
                self.announcer.sent();
                self.record(TelemetryEventKind::Registered(id));
            }
            Command::StatusRequest => {
                self.reports.start_cycle();
            }
            Command::CellDetail { index } => {
                self.reports.request_cells(index, self.frame.expected_cells);
            }
            Command::SetTarget(raw) => {
                power::request_target(self.durable, raw);
            }
            Command::HardwareDetail => self.reports.request_hardware_detail(),
            Command::Deregister | Command::DeregisterAll => {
                let was_registered = self.durable.is_registered();
                self.durable.deregister();
                self.reports.abandon_cycle();
                self.durable.set_target(ModuleState::Off);
                if was_registered {
                    self.record(TelemetryEventKind::Deregistered);
                }
            }
            Command::SetMax(raw) => {
                power::request_max(self.durable, raw);
            }
            Command::Isolate => self.isolate(),
            Command::SetTime(seconds) => self.clock.set(seconds),
            Command::AnnounceRequest => self.request_announcement(),
        }
    }
}

impl<B: Board> MessageHandler for ModuleController<'_, B> {
    fn on_message(&mut self, kind: InboundKind, payload: &[u8]) {
        let address = Address {
            unique_id: self.config.unique_id,
            registration: self.registration(),
        };
        let decoded = registration::decode(kind, payload, address);
        if decoded.contact {
            self.contact.refresh();
        }
        if let Some(command) = decoded.command {
            self.apply(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::{SimBoard, inbound};
    use super::*;
    use crate::transport::ControllerEvent;
    use crate::transport::sim::SimulatedController;

    const UNIQUE_ID: u32 = 0x0102_0364;

    fn config() -> ConfigSnapshot {
        ConfigSnapshot {
            unique_id: UNIQUE_ID,
            expected_cells: 4,
            max_charge_current: 0,
            max_discharge_current: 0,
            mismatch_threshold: 3,
        }
    }

    fn registration_payload(id: u8) -> [u8; 8] {
        let mut payload = [id, 0, 0x02, 0x03, 0, 0, 0, 0];
        payload[4..].copy_from_slice(&UNIQUE_ID.to_le_bytes());
        payload
    }

    #[test]
    fn cold_boot_runs_init_on_first_pass() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        node.boot(BootPath::ColdStart);
        node.on_timer_tick();
        node.service();

        assert_eq!(node.durable().current(), ModuleState::Off);
        assert!(node.power().outputs().analog_powered());
        assert!(!node.power().outputs().relay());
    }

    #[test]
    fn registration_message_registers_and_queues_reports() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        node.boot(BootPath::ColdStart);

        let frame = inbound(InboundKind::Registration, 0, &registration_payload(9)).expect("frame");
        assert_eq!(node.receive(&frame), Some(InboundKind::Registration));
        assert_eq!(node.status().registration, Some(9));
        assert!(node.reports().cycle_in_flight());

        node.on_timer_tick();
        node.service();
        transport.on_event(ControllerEvent::TxComplete);
        let sent = transport.with_controller(|controller| {
            controller.pop_transmitted().expect("report frame")
        });
        assert_eq!(sent.id() & 0xff, 9);
    }

    #[test]
    fn unregistered_state_request_keeps_outputs_open() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        node.boot(BootPath::ColdStart);
        node.on_timer_tick();
        node.service();
        assert!(node.request_max(ModuleState::On));
        assert!(node.request_target(ModuleState::On));
        node.on_timer_tick();
        node.service();

        assert_eq!(node.durable().current(), ModuleState::Off);
        assert_eq!(node.durable().target(), ModuleState::Off);
        assert!(!node.power().outputs().relay_ever_asserted());
    }
}
