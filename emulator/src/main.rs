mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{LineSource, Session, TranscriptProfile};

/// Operator terminal: prompts on stdout, reads stdin.
struct Terminal<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineSource for Terminal<R, W> {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        write!(self.writer, "> ")?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            writeln!(self.writer)?;
            return Ok(None);
        }
        Ok(Some(line))
    }
}

fn main() -> io::Result<()> {
    let profile = parse_profile().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: emulator [--profile <session|registration|overcurrent|watchdog>] | emulator <profile>"
        );
        process::exit(2);
    });

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "Module controller emulator ready (unique id {:#010x}). Type `help` for commands or `exit` to quit.",
        session::UNIQUE_ID
    )?;

    let mut session = Session::new(profile)?;
    let mut terminal = Terminal {
        reader: io::stdin().lock(),
        writer: io::stdout(),
    };
    session.run(&mut terminal, &mut writer)?;

    writeln!(writer, "Session closed.")?;
    Ok(())
}

fn parse_profile() -> Result<TranscriptProfile, String> {
    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            TranscriptProfile::from_tag(value)
        } else if arg == "--profile" {
            if let Some(value) = args.next() {
                TranscriptProfile::from_tag(&value)
            } else {
                Err("Expected value after --profile".to_string())
            }
        } else {
            TranscriptProfile::from_tag(&arg)
        }
    } else {
        Ok(TranscriptProfile::Session)
    }
}
