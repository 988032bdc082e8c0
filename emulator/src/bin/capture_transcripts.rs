use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Script, Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Registration)?;
    record_profile(TranscriptProfile::Overcurrent)?;
    record_profile(TranscriptProfile::WatchdogResume)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    let lines: &[&str] = match profile {
        TranscriptProfile::Session => &[],
        TranscriptProfile::Registration => &REGISTRATION,
        TranscriptProfile::Overcurrent => &OVERCURRENT,
        TranscriptProfile::WatchdogResume => &WATCHDOG_RESUME,
    };
    session.run(&mut Script::new(lines), &mut io::sink())
}

const REGISTRATION: [&str; 9] = [
    "status",
    "tick 10",
    "announce",
    "tick 15",
    "register 9",
    "tick 8",
    "request status",
    "tick 8",
    "can",
];

const OVERCURRENT: [&str; 10] = [
    "register 9",
    "tick 6",
    "max on",
    "state on",
    "tick 12",
    "status",
    "overcurrent",
    "tick 6",
    "status",
    "events",
];

const WATCHDOG_RESUME: [&str; 8] = [
    "register 9",
    "max on",
    "state standby",
    "tick 12",
    "reset watchdog",
    "status",
    "tick 6",
    "events",
];
