//! Line-oriented service console shared by the firmware UART and the emulator.
//!
//! [`grammar`] turns a line into a [`Command`]. [`execute`] runs the commands
//! any node can answer; the simulation commands are left to a harness that
//! owns a simulated board and come back as [`ConsoleError::Unsupported`] here.

pub mod catalog;
pub mod grammar;

use core::fmt;

pub use grammar::{Command, ParseError, ResetKind, parse};

use crate::node::{Board, ModuleController};

/// Number of telemetry records `events` prints.
pub const EVENTS_SHOWN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    /// The command needs a simulated board.
    Unsupported,
    /// The node refused the requested state.
    Rejected,
    UnknownTopic,
    /// The output sink failed.
    Output,
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Unsupported => f.write_str("unsupported"),
            ConsoleError::Rejected => f.write_str("rejected"),
            ConsoleError::UnknownTopic => f.write_str("unknown help topic"),
            ConsoleError::Output => f.write_str("output error"),
        }
    }
}

impl From<fmt::Error> for ConsoleError {
    fn from(_: fmt::Error) -> Self {
        ConsoleError::Output
    }
}

/// Runs a node-level command and writes its reply to `out`.
///
/// # Errors
///
/// Returns [`ConsoleError::Unsupported`] for simulation commands, and
/// [`ConsoleError::Rejected`] when a state request is refused.
pub fn execute<B: Board, W: fmt::Write>(
    node: &mut ModuleController<'_, B>,
    command: &Command<'_>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    match command {
        Command::Status => writeln!(out, "{}", node.status())?,
        Command::Can => writeln!(out, "{}", node.bus_diagnostics())?,
        Command::State(state) => {
            if !node.request_target(*state) {
                return Err(ConsoleError::Rejected);
            }
            writeln!(out, "target {state}")?;
        }
        Command::Max(state) => {
            if !node.request_max(*state) {
                return Err(ConsoleError::Rejected);
            }
            writeln!(out, "max {state}")?;
        }
        Command::Isolate => {
            node.isolate();
            writeln!(out, "isolating")?;
        }
        Command::Announce => {
            node.request_announcement();
            writeln!(out, "announcement requested")?;
        }
        Command::Events => {
            let telemetry = node.telemetry();
            let skip = telemetry.len().saturating_sub(EVENTS_SHOWN);
            for record in telemetry.oldest_first().skip(skip) {
                writeln!(out, "{record}")?;
            }
        }
        Command::Help { topic } => write_help(*topic, out)?,
        _ => return Err(ConsoleError::Unsupported),
    }
    Ok(())
}

/// Writes the command list, or the usage line for one command.
///
/// # Errors
///
/// [`ConsoleError::UnknownTopic`] when `topic` names no command.
pub fn write_help<W: fmt::Write>(topic: Option<&str>, out: &mut W) -> Result<(), ConsoleError> {
    if let Some(topic) = topic {
        let entry = catalog::find(topic).ok_or(ConsoleError::UnknownTopic)?;
        writeln!(out, "{}  {}", entry.usage, entry.summary)?;
        return Ok(());
    }
    for entry in catalog::commands() {
        let marker = if entry.simulation { " (sim)" } else { "" };
        writeln!(out, "{:<34}{}{marker}", entry.usage, entry.summary)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use heapless::String;

    use super::*;
    use crate::collaborators::ConfigSnapshot;
    use crate::durable::{BootPath, DurableState};
    use crate::node::sim::SimBoard;
    use crate::power::ModuleState;
    use crate::transport::CanTransport;
    use crate::transport::sim::SimulatedController;

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
    fn status_reports_unregistered_node() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        node.boot(BootPath::ColdStart);
        node.on_timer_tick();
        node.service();

        let mut out: String<256> = String::new();
        let command = parse("status").expect("parse");
        execute(&mut node, &command, &mut out).expect("execute");
        assert!(out.contains("state=off"));
        assert!(out.contains("unregistered"));
    }

    #[test]
    fn simulation_commands_are_unsupported() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        let mut out: String<64> = String::new();
        let command = parse("tick 5").expect("parse");
        assert_eq!(
            execute(&mut node, &command, &mut out),
            Err(ConsoleError::Unsupported)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn state_request_updates_target() {
        let mut durable = DurableState::cold();
        let transport = CanTransport::new(SimulatedController::new());
        let mut node =
            ModuleController::<SimBoard>::new(&mut durable, &transport, SimBoard::parts(), config());
        node.boot(BootPath::ColdStart);
        node.on_timer_tick();
        node.service();

        let mut out: String<64> = String::new();
        execute(&mut node, &parse("max on").expect("parse"), &mut out).expect("max");
        execute(&mut node, &parse("state standby").expect("parse"), &mut out).expect("state");
        assert_eq!(node.durable().target(), ModuleState::Standby);
        assert_eq!(out.as_str(), "max on\ntarget standby\n");
    }

    #[test]
    fn help_lists_every_command() {
        let mut out: String<2048> = String::new();
        write_help(None, &mut out).expect("help");
        assert_eq!(out.lines().count(), catalog::commands().len());

        let mut out: String<64> = String::new();
        write_help(Some("RESET"), &mut out).expect("topic");
        assert!(out.starts_with("reset <watchdog|power>"));
        assert_eq!(
            write_help(Some("reboot"), &mut out),
            Err(ConsoleError::UnknownTopic)
        );
    }
}
