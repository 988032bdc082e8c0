//! Debug UART console.
//!
//! [`LineAssembler`] turns the raw byte stream into lines; [`respond`] runs a
//! line against the node and renders the reply. Both are plain data code so
//! they run on the host as well as in the node task.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use heapless::{String, Vec};
use module_core::console::{self, Command, ConsoleError};
use module_core::node::{Board, ModuleController};

use crate::status;

/// Maximum number of bytes accepted on a single line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Room for the longest reply, the full `help` listing.
pub const REPLY_CAPACITY: usize = 2048;

pub type Line = String<MAX_LINE_LEN>;
pub type Reply = String<REPLY_CAPACITY>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineError {
    /// Input exceeded [`MAX_LINE_LEN`]; the rest of the line is discarded.
    Overflow,
    InvalidUtf8,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::Overflow => f.write_str("line too long"),
            LineError::InvalidUtf8 => f.write_str("invalid utf-8"),
        }
    }
}

/// Collects bytes until a terminator.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    discarding: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            discarding: false,
        }
    }

    /// Feeds a single byte. A terminator completes the pending line; blank
    /// lines yield nothing.
    pub fn ingest(&mut self, byte: u8) -> Result<Option<Line>, LineError> {
        match byte {
            b'\r' | b'\n' => self.finish(),
            0x08 | 0x7f => {
                self.buffer.pop();
                Ok(None)
            }
            _ if self.discarding => Ok(None),
            value => {
                if self.buffer.push(value).is_err() {
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(LineError::Overflow);
                }
                Ok(None)
            }
        }
    }

    fn finish(&mut self) -> Result<Option<Line>, LineError> {
        if core::mem::take(&mut self.discarding) || self.buffer.is_empty() {
            self.buffer.clear();
            return Ok(None);
        }
        let bytes = core::mem::take(&mut self.buffer);
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| LineError::InvalidUtf8)
    }
}

/// Runs one console line against `node`, writing the reply to `out`.
///
/// Parse failures and refused commands are reported in the reply; only a
/// failing sink is an error.
pub fn respond<B: Board, W: fmt::Write>(
    node: &mut ModuleController<'_, B>,
    line: &str,
    out: &mut W,
) -> fmt::Result {
    let command = match console::parse(line) {
        Ok(command) => command,
        Err(err) => return writeln!(out, "error: {err}"),
    };

    match console::execute(node, &command, out) {
        Ok(()) => {
            if matches!(command, Command::Status) {
                writeln!(out, "{}", status::snapshot())?;
            }
            Ok(())
        }
        Err(ConsoleError::Output) => Err(fmt::Error),
        Err(err) => writeln!(out, "error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use module_core::collaborators::ConfigSnapshot;
    use module_core::durable::{BootPath, DurableState};
    use module_core::node::sim::SimBoard;
    use module_core::transport::CanTransport;
    use module_core::transport::sim::SimulatedController;

    fn feed(assembler: &mut LineAssembler, bytes: &[u8]) -> Option<Line> {
        let mut line = None;
        for byte in bytes {
            if let Some(complete) = assembler.ingest(*byte).expect("byte accepted") {
                line = Some(complete);
            }
        }
        line
    }

    fn config() -> ConfigSnapshot {
        ConfigSnapshot {
            unique_id: 0x0102_0364,
            expected_cells: 4,
            max_charge_current: 0,
            max_discharge_current: 0,
            mismatch_threshold: 3,
        }
    }

    #[test]
    fn assembles_lines_and_applies_backspace() {
        let mut assembler = LineAssembler::new();
        let line = feed(&mut assembler, b"statx\x08us\r\n").expect("complete line");
        assert_eq!(line.as_str(), "status");
        assert!(feed(&mut assembler, b"\n").is_none());
    }

    #[test]
    fn overflow_discards_the_rest_of_the_line() {
        let mut assembler = LineAssembler::new();
        for _ in 0..MAX_LINE_LEN {
            assembler.ingest(b'a').expect("within limit");
        }
        assert_eq!(assembler.ingest(b'b'), Err(LineError::Overflow));
        assert_eq!(assembler.ingest(b'c'), Ok(None));
        assert_eq!(assembler.ingest(b'\n'), Ok(None));

        let line = feed(&mut assembler, b"can\n").expect("next line");
        assert_eq!(line.as_str(), "can");
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut assembler = LineAssembler::new();
        assembler.ingest(0xff).expect("byte accepted");
        assert_eq!(assembler.ingest(b'\n'), Err(LineError::InvalidUtf8));
    }

    #[test]
    fn replies_cover_status_errors_and_simulation_commands() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        node.boot(BootPath::ColdStart);

        let mut reply = Reply::new();
        respond(&mut node, "status", &mut reply).expect("status reply");
        assert!(reply.contains("unregistered"));
        assert!(reply.contains("fw ticks="));

        let mut reply = Reply::new();
        respond(&mut node, "tick 3", &mut reply).expect("tick reply");
        assert_eq!(reply.as_str(), "error: unsupported\n");

        let mut reply = Reply::new();
        respond(&mut node, "reboot", &mut reply).expect("parse error reply");
        assert!(reply.starts_with("error: "));
    }
}
