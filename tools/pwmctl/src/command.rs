//! Console commands
//!
//! One command per line, words separated by whitespace.

use std::str::FromStr;

use softpwm::{Attribute, InputError, LineId};
use thiserror::Error;

pub const HELP: &str = "\
export N              claim line N and start the default waveform
unexport N            stop line N and release it
write N ATTR VALUE    store VALUE into pwmN/ATTR
read N ATTR           show pwmN/ATTR
list                  exported lines
status N              snapshot of line N as JSON
help                  this text
quit                  stop pwmctl and release every line
attributes: frequency, duty_cycle, duty_cycle_ns, period_ns";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Export(LineId),
    Unexport(LineId),
    Write {
        line: LineId,
        attribute: Attribute,
        value: String,
    },
    Read {
        line: LineId,
        attribute: Attribute,
    },
    List,
    Status(LineId),
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
    #[error("`{command}` expects {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("`{command}` takes no argument `{extra}`")]
    UnexpectedArgument { command: &'static str, extra: String },
    #[error("`{0}` is not a line number")]
    InvalidLine(String),
    #[error(transparent)]
    Attribute(#[from] InputError),
}

/// Word cursor over one input line.
struct Words<'a> {
    command: &'static str,
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> Words<'a> {
    fn required(&mut self, argument: &'static str) -> Result<&'a str, CommandError> {
        self.iter.next().ok_or(CommandError::MissingArgument {
            command: self.command,
            argument,
        })
    }

    fn line(&mut self) -> Result<LineId, CommandError> {
        let word = self.required("a line number")?;
        word.parse::<u32>()
            .map(LineId)
            .map_err(|_| CommandError::InvalidLine(word.to_owned()))
    }

    fn attribute(&mut self) -> Result<Attribute, CommandError> {
        Ok(self.required("an attribute")?.parse()?)
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.iter.next() {
            None => Ok(()),
            Some(extra) => Err(CommandError::UnexpectedArgument {
                command: self.command,
                extra: extra.to_owned(),
            }),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut iter = input.split_whitespace();
        let word = iter.next().ok_or(CommandError::Empty)?;
        let command: &'static str = match word.to_ascii_lowercase().as_str() {
            "export" => "export",
            "unexport" => "unexport",
            "write" => "write",
            "read" => "read",
            "list" | "ls" => "list",
            "status" => "status",
            "help" | "?" => "help",
            "quit" | "exit" => "quit",
            _ => return Err(CommandError::Unknown(word.to_owned())),
        };
        let mut words = Words { command, iter };

        let parsed = match command {
            "export" => Self::Export(words.line()?),
            "unexport" => Self::Unexport(words.line()?),
            "write" => Self::Write {
                line: words.line()?,
                attribute: words.attribute()?,
                value: words.required("a value")?.to_owned(),
            },
            "read" => Self::Read {
                line: words.line()?,
                attribute: words.attribute()?,
            },
            "status" => Self::Status(words.line()?),
            "list" => Self::List,
            "help" => Self::Help,
            _ => Self::Quit,
        };
        words.finish()?;
        Ok(parsed)
    }
}
