use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use module_core::collaborators::sim::MemoryByteStore;
use module_core::collaborators::{ConfigSnapshot, EepromConfig};
use module_core::console::{self, Command, ConsoleError, ResetKind};
use module_core::durable::{BootPath, DurableState, ResetCause};
use module_core::frame::{AdcChannel, CellSample};
use module_core::node::sim::{SimBoard, inbound};
use module_core::node::{BoardParts, ModuleController};
use module_core::protocol::payload::{MANUFACTURER_ID, PART_ID};
use module_core::telemetry::EventId;
use module_core::transport::sim::SimulatedController;
use module_core::transport::{CanFrame, CanTransport, ControllerEvent, InboundKind, OutboundKind};

pub type Node<'a> = ModuleController<'a, SimBoard>;
pub type Transport = CanTransport<SimulatedController>;

pub const UNIQUE_ID: u32 = 0x0102_0364;
const EXPECTED_CELLS: u8 = 4;
const MISMATCH_THRESHOLD: u8 = 3;

/// Answer from every position of the simulated cell chain.
const HEALTHY_CELL: CellSample = CellSample {
    voltage: 0x0347,
    temperature: 0x0150,
};

/// Conversion results fed back on every pass, in [`AdcChannel::ALL`] order.
const ADC_READINGS: [u16; AdcChannel::COUNT] = [2480, 2061, 2048, 0, 1900];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Session,
    Registration,
    Overcurrent,
    WatchdogResume,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Session => "transcripts/emulator-session.log",
            TranscriptProfile::Registration => "transcripts/emulator-registration.log",
            TranscriptProfile::Overcurrent => "transcripts/emulator-overcurrent.log",
            TranscriptProfile::WatchdogResume => "transcripts/emulator-watchdog-resume.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Session => "Module controller emulator session transcript",
            TranscriptProfile::Registration => "Module controller emulator registration transcript",
            TranscriptProfile::Overcurrent => "Module controller emulator overcurrent transcript",
            TranscriptProfile::WatchdogResume => {
                "Module controller emulator watchdog resume transcript"
            }
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("session") {
            Ok(Self::Session)
        } else if tag.eq_ignore_ascii_case("registration") {
            Ok(Self::Registration)
        } else if tag.eq_ignore_ascii_case("overcurrent") {
            Ok(Self::Overcurrent)
        } else if tag.eq_ignore_ascii_case("watchdog") {
            Ok(Self::WatchdogResume)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

/// Supplies operator lines to a session.
pub trait LineSource {
    /// Next line, or `None` once input is exhausted.
    fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Fixed list of lines, used for recorded transcripts.
pub struct Script<'a> {
    lines: std::slice::Iter<'a, &'a str>,
}

impl<'a> Script<'a> {
    pub fn new(lines: &'a [&'a str]) -> Self {
        Self {
            lines: lines.iter(),
        }
    }
}

impl LineSource for Script<'_> {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.next().map(|line| (*line).to_owned()))
    }
}

/// Drives one simulated node through its resets.
pub struct Session {
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    config: ConfigSnapshot,
    failing_transmits: u8,
    next_event: EventId,
}

impl Session {
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let mut session = Self::detached();
        session.transcript = Some(TranscriptLogger::new(profile)?);
        Ok(session)
    }

    /// Session that keeps no transcript.
    pub fn detached() -> Self {
        let store = MemoryByteStore::with_parameters(
            UNIQUE_ID,
            EXPECTED_CELLS,
            0,
            0,
            MISMATCH_THRESHOLD,
        );
        Self {
            transcript: None,
            started_at: HostInstant::now(),
            config: ConfigSnapshot::load(&EepromConfig::new(store)),
            failing_transmits: 0,
            next_event: 0,
        }
    }

    /// Serves `source` until it runs dry or the operator quits. A `reset`
    /// command tears the node down and boots a new one over the same
    /// durable record.
    pub fn run<S, W>(&mut self, source: &mut S, out: &mut W) -> io::Result<()>
    where
        S: LineSource,
        W: Write,
    {
        let mut durable = DurableState::cold();
        let mut path = BootPath::ColdStart;

        loop {
            let transport = Transport::new(SimulatedController::new());
            let mut node = Node::new(&mut durable, &transport, board(), self.config);
            node.boot(path);
            self.next_event = 0;
            self.failing_transmits = 0;

            let boot = self.drain_events(&node);
            self.emit(self.started_at.elapsed(), &boot, out)?;

            let cause = self.serve(&mut node, &transport, source, out)?;
            let snapshot = *node.durable();
            drop(node);
            let Some(cause) = cause else {
                return Ok(());
            };
            (durable, path) = DurableState::resume(snapshot, cause);
        }
    }

    fn serve<S, W>(
        &mut self,
        node: &mut Node<'_>,
        transport: &Transport,
        source: &mut S,
        out: &mut W,
    ) -> io::Result<Option<ResetCause>>
    where
        S: LineSource,
        W: Write,
    {
        while let Some(line) = source.next_line()? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if should_terminate(trimmed) {
                return Ok(None);
            }

            let elapsed = self.started_at.elapsed();
            if let Some(transcript) = self.transcript.as_mut() {
                transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
            }

            let mut lines = Vec::new();
            let reset = self.handle_command(node, transport, trimmed, &mut lines);
            lines.extend(self.drain_events(node));
            self.emit(elapsed, &lines, out)?;

            if reset.is_some() {
                return Ok(reset);
            }
        }
        Ok(None)
    }

    fn handle_command(
        &mut self,
        node: &mut Node<'_>,
        transport: &Transport,
        line: &str,
        lines: &mut Vec<String>,
    ) -> Option<ResetCause> {
        let command = match console::parse(line) {
            Ok(command) => command,
            Err(err) => {
                lines.push(format!("ERR syntax {err}"));
                return None;
            }
        };

        match command {
            Command::Tick(count) => {
                for _ in 0..count {
                    self.pass(node, transport, lines);
                }
                lines.push(format!("t={}", node.status().tick));
            }
            Command::Register(id) => {
                let frame = registration_frame(node.config().unique_id, id);
                deliver(node, frame, lines);
            }
            Command::Deregister => {
                let frame = addressed(InboundKind::Deregister, node.durable().registration_id());
                deliver(node, frame, lines);
            }
            Command::RequestStatus => {
                let frame = addressed(
                    InboundKind::StatusRequest,
                    node.durable().registration_id(),
                );
                deliver(node, frame, lines);
            }
            Command::Overcurrent => {
                node.power_mut().outputs_mut().latch_overcurrent(true);
                node.overcurrent_edge();
                node.power_mut().outputs_mut().latch_overcurrent(false);
                lines.push(format!(
                    "overcurrent edge, switch={}",
                    u8::from(node.power().outputs().switch())
                ));
            }
            Command::AuxLoss => {
                node.aux_power_lost();
                lines.push("auxiliary supply lost".to_owned());
            }
            Command::BusOff => {
                transport.on_event(ControllerEvent::BusOff);
                lines.push("controller bus-off".to_owned());
            }
            Command::TxError(count) => {
                self.failing_transmits = self.failing_transmits.saturating_add(count);
                lines.push(format!(
                    "next {} transmissions fail",
                    self.failing_transmits
                ));
            }
            Command::TxOk => {
                self.failing_transmits = 0;
                if transport.is_busy() {
                    transport.on_event(ControllerEvent::TxComplete);
                    lines.push("mailbox acknowledged".to_owned());
                } else {
                    lines.push("mailbox idle".to_owned());
                }
            }
            Command::Reset(kind) => {
                let (cause, label) = match kind {
                    ResetKind::Watchdog => (ResetCause::Watchdog, "watchdog"),
                    ResetKind::Power => (ResetCause::PowerOn, "power"),
                };
                lines.push(format!("reset ({label})"));
                return Some(cause);
            }
            other => {
                let mut reply = String::new();
                match console::execute(node, &other, &mut reply) {
                    Ok(()) => lines.extend(reply.lines().map(str::to_owned)),
                    Err(ConsoleError::Rejected) => lines.push("ERR rejected".to_owned()),
                    Err(err) => lines.push(format!("ERR {err}")),
                }
            }
        }
        None
    }

    fn pass(&mut self, node: &mut Node<'_>, transport: &Transport, lines: &mut Vec<String>) {
        node.on_timer_tick();
        for (channel, reading) in AdcChannel::ALL.into_iter().zip(ADC_READINGS) {
            node.on_adc_reading(channel, reading);
        }
        node.service();
        self.settle_mailbox(transport, lines);
    }

    /// Resolves the frame in flight the way the bus would. A failed
    /// attempt is retransmitted straight away, so this runs until the
    /// mailbox is idle or acknowledged.
    fn settle_mailbox(&mut self, transport: &Transport, lines: &mut Vec<String>) {
        loop {
            transport.with_controller(|controller| {
                while let Some(frame) = controller.pop_transmitted() {
                    lines.push(describe_frame(&frame));
                }
            });
            if !transport.is_busy() {
                return;
            }
            if self.failing_transmits == 0 {
                transport.on_event(ControllerEvent::TxComplete);
                return;
            }
            self.failing_transmits -= 1;
            lines.push("CAN ! transmit error".to_owned());
            transport.on_event(ControllerEvent::TxError);
        }
    }

    fn drain_events(&mut self, node: &Node<'_>) -> Vec<String> {
        let telemetry = node.telemetry();
        let lines = telemetry
            .since(self.next_event)
            .map(|record| format!("event {record}"))
            .collect();
        self.next_event = telemetry.next_id();
        lines
    }

    fn emit<W: Write>(&mut self, elapsed: Duration, lines: &[String], out: &mut W) -> io::Result<()> {
        for line in lines {
            if let Some(transcript) = self.transcript.as_mut() {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

fn board() -> BoardParts<SimBoard> {
    let mut parts = SimBoard::parts();
    parts
        .cell_link
        .set_uniform_cells(usize::from(EXPECTED_CELLS), HEALTHY_CELL);
    parts
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn registration_frame(unique_id: u32, id: u8) -> Option<CanFrame> {
    let mut payload = [id, 0, MANUFACTURER_ID, PART_ID, 0, 0, 0, 0];
    payload[4..].copy_from_slice(&unique_id.to_le_bytes());
    inbound(InboundKind::Registration, 0, &payload)
}

fn addressed(kind: InboundKind, id: u8) -> Option<CanFrame> {
    inbound(kind, 0, &[id])
}

fn deliver(node: &mut Node<'_>, frame: Option<CanFrame>, lines: &mut Vec<String>) {
    let Some(frame) = frame else {
        lines.push("ERR frame does not fit".to_owned());
        return;
    };
    match node.receive(&frame) {
        Some(kind) => lines.push(format!("CAN < {kind}")),
        None => lines.push("CAN < filtered".to_owned()),
    }
}

fn describe_frame(frame: &CanFrame) -> String {
    let message_type = frame.message_type();
    let label = OutboundKind::from_raw(message_type).map_or("unknown", OutboundKind::label);
    let mut line = format!(
        "CAN > {label} ({message_type:#05x}) from={}",
        frame.id() & 0xff
    );
    for byte in frame.payload() {
        let _ = write!(line, " {byte:02x}");
    }
    line
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> String {
        let mut session = Session::detached();
        let mut out = Vec::new();
        session
            .run(&mut Script::new(lines), &mut out)
            .expect("session runs");
        String::from_utf8(out).expect("utf-8 output")
    }

    #[test]
    fn registration_starts_status_reports() {
        let output = run(&["tick 3", "register 9", "tick 2"]);
        assert!(output.starts_with("event #0 t=0 cold-start"));
        assert!(output.contains("CAN < registration (0x510)"));
        assert!(output.contains("registered id=9"));
        assert!(output.contains("CAN > request-time (0x506) from=9"));
        assert!(output.contains("CAN > status1 (0x502) from=9"));
    }

    #[test]
    fn simulation_commands_reach_the_node() {
        let output = run(&["tx-error 2", "bus-off", "can"]);
        assert!(output.contains("next 2 transmissions fail"));
        assert!(output.contains("controller bus-off"));
        assert!(output.contains("bus-off=1"));
    }

    #[test]
    fn watchdog_reset_resumes_durable_record() {
        let output = run(&[
            "register 9",
            "max on",
            "tick 6",
            "reset watchdog",
            "status",
        ]);
        assert!(output.contains("reset (watchdog)"));
        assert!(output.contains("resumed"));
        assert!(output.contains("id=9"));
        assert!(output.contains("wdt-resets=1"));
    }

    #[test]
    fn power_reset_starts_cold() {
        let output = run(&["register 9", "reset power", "status"]);
        assert_eq!(output.matches("cold-start").count(), 2);
        assert!(output.contains("unregistered"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let output = run(&["reboot"]);
        assert!(output.starts_with("event #0"));
        assert!(output.contains("ERR syntax"));
    }

    #[test]
    fn quit_ends_the_session() {
        let output = run(&["quit", "status"]);
        assert!(!output.contains("state="));
    }
}
