use std::path::PathBuf;

use copperline::Copperline;
use sldbg::command::{self, Command};
use sldbg::debugger::Debugger;

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(target) = args.next() else {
        eprintln!("Usage: sldbg <program>");
        std::process::exit(1);
    };

    let mut debugger = match Debugger::new(PathBuf::from(target)) {
        Ok(debugger) => debugger,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };

    let mut line_editor = Copperline::new();
    while let Ok(line) = line_editor.read_line("sldbg> ", copperline::Encoding::Utf8) {
        if !line.is_empty() {
            match command::parse(&line) {
                Ok(Command::Unknown) => println!("Unknown command."),
                Ok(command) => {
                    if let Err(err) = debugger.handle(command) {
                        eprintln!("{err:#}");
                        std::process::exit(1);
                    }
                }
                // Parse problems are recoverable; report and re-prompt.
                Err(err) => println!("{err}"),
            }
        }
        line_editor.add_history(line);
    }
}
