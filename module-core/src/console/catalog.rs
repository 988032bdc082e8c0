//! Command table shared by the console parser and the help output.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Status,
    Can,
    State,
    Max,
    Isolate,
    Announce,
    Events,
    Help,
    Tick,
    Register,
    Deregister,
    Request,
    Overcurrent,
    AuxLoss,
    BusOff,
    TxError,
    TxOk,
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
    /// Only meaningful against a simulated board.
    pub simulation: bool,
}

const fn node(
    name: &'static str,
    tag: CommandTag,
    usage: &'static str,
    summary: &'static str,
) -> CommandSpec {
    CommandSpec {
        name,
        tag,
        usage,
        summary,
        simulation: false,
    }
}

const fn sim(
    name: &'static str,
    tag: CommandTag,
    usage: &'static str,
    summary: &'static str,
) -> CommandSpec {
    CommandSpec {
        name,
        tag,
        usage,
        summary,
        simulation: true,
    }
}

const COMMANDS: [CommandSpec; 18] = [
    node("status", CommandTag::Status, "status", "node snapshot"),
    node("can", CommandTag::Can, "can", "bus diagnostics"),
    node(
        "state",
        CommandTag::State,
        "state <off|standby|precharge|on>",
        "request a target state",
    ),
    node(
        "max",
        CommandTag::Max,
        "max <off|standby|precharge|on>",
        "set the maximum allowed state",
    ),
    node("isolate", CommandTag::Isolate, "isolate", "open both outputs"),
    node(
        "announce",
        CommandTag::Announce,
        "announce",
        "schedule an announcement",
    ),
    node("events", CommandTag::Events, "events", "recent telemetry"),
    node("help", CommandTag::Help, "help [command]", "list commands"),
    sim("tick", CommandTag::Tick, "tick [n]", "advance n scheduler ticks"),
    sim(
        "register",
        CommandTag::Register,
        "register <id>",
        "pack controller assigns an id",
    ),
    sim(
        "deregister",
        CommandTag::Deregister,
        "deregister",
        "pack controller releases this module",
    ),
    sim(
        "request",
        CommandTag::Request,
        "request status",
        "pack controller asks for status",
    ),
    sim(
        "overcurrent",
        CommandTag::Overcurrent,
        "overcurrent",
        "overcurrent line edge",
    ),
    sim(
        "aux-loss",
        CommandTag::AuxLoss,
        "aux-loss",
        "auxiliary supply lost",
    ),
    sim("bus-off", CommandTag::BusOff, "bus-off", "controller goes bus-off"),
    sim(
        "tx-error",
        CommandTag::TxError,
        "tx-error [n]",
        "fail the next n transmissions",
    ),
    sim("tx-ok", CommandTag::TxOk, "tx-ok", "acknowledge the mailbox"),
    sim(
        "reset",
        CommandTag::Reset,
        "reset <watchdog|power>",
        "reboot the simulated node",
    ),
];

#[must_use]
pub fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Case-insensitive lookup by command name.
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name))
}
