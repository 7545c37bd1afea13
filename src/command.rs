use anyhow::{bail, Result};

use crate::utils::tokenize;

/// A parsed REPL command. Commands are matched by their shortest
/// unambiguous prefix: `br`, `bt`, `c`, `d`, `f`, `i`, `n`, `p`, `q`,
/// `se`, `sta`, `ste`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Break { location: String },
    Backtrace,
    Continue,
    Delete,
    Finish,
    Info,
    Next,
    Print { variable: String },
    Quit,
    Set { variable: String, value: i32 },
    Start,
    Step { count: u32 },
    Unknown,
}

/// Parse one line of user input. Errors are recoverable: the caller prints
/// the message and returns to the prompt.
pub fn parse(input: &str) -> Result<Command> {
    let (head, arguments) = match input.find(' ') {
        Some(split) => (&input[..split], input[split + 1..].trim()),
        None => (input, ""),
    };

    if head.starts_with("br") {
        if arguments.is_empty() {
            bail!("Expected a breakpoint location.");
        }
        return Ok(Command::Break {
            location: arguments.to_string(),
        });
    }
    if head.starts_with("bt") {
        return Ok(Command::Backtrace);
    }
    if head.starts_with('c') {
        return Ok(Command::Continue);
    }
    if head.starts_with('d') {
        return Ok(Command::Delete);
    }
    if head.starts_with('f') {
        return Ok(Command::Finish);
    }
    if head.starts_with('i') {
        return Ok(Command::Info);
    }
    if head.starts_with('n') {
        return Ok(Command::Next);
    }
    if head.starts_with('p') {
        if arguments.is_empty() {
            bail!("Expected a variable name.");
        }
        return Ok(Command::Print {
            variable: arguments.to_string(),
        });
    }
    if head.starts_with('q') {
        return Ok(Command::Quit);
    }
    if head.starts_with("se") {
        let tokens = tokenize(arguments, ' ');
        if tokens.len() != 2 {
            bail!("Expected a variable name and value.");
        }
        let Ok(value) = tokens[1].parse::<i32>() else {
            bail!("Expected an integer value.");
        };
        return Ok(Command::Set {
            variable: tokens[0].clone(),
            value,
        });
    }
    if head.starts_with("sta") {
        return Ok(Command::Start);
    }
    if head.starts_with("ste") {
        let count = if arguments.is_empty() {
            1
        } else {
            match arguments.parse::<u32>() {
                Ok(count) => count,
                Err(_) => bail!("Expected a step count."),
            }
        };
        return Ok(Command::Step { count });
    }
    Ok(Command::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_select_commands() {
        assert_eq!(parse("bt").unwrap(), Command::Backtrace);
        assert_eq!(parse("c").unwrap(), Command::Continue);
        assert_eq!(parse("continue").unwrap(), Command::Continue);
        assert_eq!(parse("d").unwrap(), Command::Delete);
        assert_eq!(parse("finish").unwrap(), Command::Finish);
        assert_eq!(parse("i").unwrap(), Command::Info);
        assert_eq!(parse("n").unwrap(), Command::Next);
        assert_eq!(parse("q").unwrap(), Command::Quit);
        assert_eq!(parse("sta").unwrap(), Command::Start);
        assert_eq!(parse("start").unwrap(), Command::Start);
    }

    #[test]
    fn break_takes_a_location() {
        assert_eq!(
            parse("br main").unwrap(),
            Command::Break { location: "main".into() }
        );
        assert_eq!(
            parse("break main.cpp:25").unwrap(),
            Command::Break { location: "main.cpp:25".into() }
        );
        assert!(parse("br").is_err());
    }

    #[test]
    fn print_takes_a_variable() {
        assert_eq!(
            parse("p answer").unwrap(),
            Command::Print { variable: "answer".into() }
        );
        assert!(parse("p").is_err());
    }

    #[test]
    fn set_takes_a_variable_and_value() {
        assert_eq!(
            parse("se answer -3").unwrap(),
            Command::Set { variable: "answer".into(), value: -3 }
        );
        assert!(parse("se answer").is_err());
        assert!(parse("se answer much").is_err());
    }

    #[test]
    fn step_count_defaults_to_one() {
        assert_eq!(parse("ste").unwrap(), Command::Step { count: 1 });
        assert_eq!(parse("step 5").unwrap(), Command::Step { count: 5 });
        assert!(parse("ste five").is_err());
    }

    #[test]
    fn unknown_input_is_not_an_error() {
        assert_eq!(parse("xyzzy").unwrap(), Command::Unknown);
    }
}
