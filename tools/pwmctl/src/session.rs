//! Command execution against a channel class.

use std::io::{self, BufRead, Write};

use log::debug;
use softpwm::{OutputBackend, PwmError, SoftPwmClass, TimerBackend};

use crate::command::{Command, CommandError, HELP};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// Why a command stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Quit,
    Eof,
}

impl StreamEnd {
    /// Whether the whole tool should stop. A closed stream only does so when
    /// no listener is left to take commands.
    pub fn stops_service(self, listening: bool) -> bool {
        match self {
            Self::Quit => true,
            Self::Eof => !listening,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Pwm(#[from] PwmError),
    #[error("cannot encode status: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Shared by the console and every socket connection.
pub struct Session<B: TimerBackend, G: OutputBackend> {
    class: SoftPwmClass<B, G>,
}

impl<B: TimerBackend, G: OutputBackend> Session<B, G> {
    pub fn new(class: SoftPwmClass<B, G>) -> Self {
        Self { class }
    }

    pub fn class(&self) -> &SoftPwmClass<B, G> {
        &self.class
    }

    pub fn execute(&self, command: Command) -> Result<Reply, SessionError> {
        debug!("executing {command:?}");
        let text = match command {
            Command::Export(line) => {
                self.class.store("export", &line.to_string())?;
                "ok".to_owned()
            }
            Command::Unexport(line) => {
                self.class.store("unexport", &line.to_string())?;
                "ok".to_owned()
            }
            Command::Write {
                line,
                attribute,
                value,
            } => {
                self.class.attribute_store(line, attribute, &value)?;
                "ok".to_owned()
            }
            Command::Read { line, attribute } => self
                .class
                .attribute_show(line, attribute)?
                .trim_end()
                .to_owned(),
            Command::List => {
                let lines = self.class.registry().lines();
                if lines.is_empty() {
                    "(none)".to_owned()
                } else {
                    lines
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" ")
                }
            }
            Command::Status(line) => {
                let snapshot = self.class.registry().snapshot(line)?;
                serde_json::to_string(&snapshot)?
            }
            Command::Help => HELP.to_owned(),
            Command::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Text(text))
    }

    /// Parses and runs one input line. Failures become `error: ...` replies;
    /// blank lines produce an empty reply.
    pub fn handle_line(&self, input: &str) -> Reply {
        let result = input
            .parse::<Command>()
            .map_err(SessionError::from)
            .and_then(|command| self.execute(command));
        match result {
            Ok(reply) => reply,
            Err(SessionError::Command(CommandError::Empty)) => Reply::Text(String::new()),
            Err(err) => Reply::Text(format!("error: {err}")),
        }
    }

    /// Answers `input` line by line until `quit` or end of input.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<StreamEnd> {
        for line in input.lines() {
            match self.handle_line(&line?) {
                Reply::Quit => return Ok(StreamEnd::Quit),
                Reply::Text(text) if text.is_empty() => {}
                Reply::Text(text) => {
                    writeln!(output, "{text}")?;
                    output.flush()?;
                }
            }
        }
        Ok(StreamEnd::Eof)
    }

    /// Tears down every channel. Returns how many were running.
    pub fn shutdown(&self) -> usize {
        self.class.registry().drain()
    }
}
