//! sysfs-style attribute surface.
//!
//! The class exposes the registry as a small tree of text attributes:
//!
//! ```text
//! export              write a line number to create a channel
//! unexport            write a line number to remove it
//! pwm<N>/frequency    write-only, Hz
//! pwm<N>/duty_cycle   write-only, percent of the period
//! pwm<N>/duty_cycle_ns
//! pwm<N>/period_ns
//! ```
//!
//! Writes follow sysfs store semantics: a value that cannot be parsed or is
//! out of range is logged and dropped, and the write still reports the whole
//! buffer as consumed.

use core::fmt;
use core::str::FromStr;

use log::warn;

use crate::error::{InputError, PwmError, PwmResult};
use crate::output::{LineId, OutputBackend};
use crate::registry::Registry;
use crate::timer::TimerBackend;

pub const CLASS_NAME: &str = "soft_pwm";

/// Per-channel attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Frequency,
    DutyCycle,
    DutyCycleNs,
    PeriodNs,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::Frequency,
        Attribute::DutyCycle,
        Attribute::DutyCycleNs,
        Attribute::PeriodNs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::DutyCycle => "duty_cycle",
            Self::DutyCycleNs => "duty_cycle_ns",
            Self::PeriodNs => "period_ns",
        }
    }

    pub fn readable(self) -> bool {
        matches!(self, Self::DutyCycleNs | Self::PeriodNs)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attribute {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.name() == s)
            .ok_or_else(|| InputError::UnknownAttribute(s.to_owned()))
    }
}

/// A node of the attribute tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Export,
    Unexport,
    Channel(LineId, Attribute),
}

impl FromStr for Node {
    type Err = InputError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let unknown = || InputError::UnknownPath(path.to_owned());
        match path.trim_matches('/') {
            "export" => Ok(Self::Export),
            "unexport" => Ok(Self::Unexport),
            other => {
                let (dir, attr) = other.split_once('/').ok_or_else(unknown)?;
                let line = dir
                    .strip_prefix("pwm")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(unknown)?;
                Ok(Self::Channel(LineId(line), attr.parse()?))
            }
        }
    }
}

/// Parses a line number written to `export` / `unexport`.
pub fn parse_line(buf: &str) -> Result<LineId, InputError> {
    let text = buf.trim();
    text.parse::<u32>()
        .map(LineId)
        .map_err(|_| InputError::Parse(text.to_owned()))
}

/// Parses an attribute value.
pub fn parse_value(buf: &str) -> Result<u64, InputError> {
    let text = buf.trim();
    text.parse::<u64>()
        .map_err(|_| InputError::Parse(text.to_owned()))
}

/// Text front-end over a [`Registry`].
pub struct SoftPwmClass<B: TimerBackend, G: OutputBackend> {
    registry: Registry<B, G>,
}

impl<B: TimerBackend, G: OutputBackend> SoftPwmClass<B, G> {
    pub fn new(registry: Registry<B, G>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry<B, G> {
        &self.registry
    }

    pub fn into_registry(self) -> Registry<B, G> {
        self.registry
    }

    /// Handles a write to `export`. A second export of the same line is
    /// reported and leaves the running channel alone.
    pub fn export_store(&self, buf: &str) -> PwmResult<usize> {
        let line = match parse_line(buf) {
            Ok(line) => line,
            Err(err) => return Ok(dropped_write("export", err, buf)),
        };
        self.registry.create(line)?;
        Ok(buf.len())
    }

    /// Handles a write to `unexport`. Unknown lines are ignored.
    pub fn unexport_store(&self, buf: &str) -> PwmResult<usize> {
        let line = match parse_line(buf) {
            Ok(line) => line,
            Err(err) => return Ok(dropped_write("unexport", err, buf)),
        };
        match self.registry.remove(line) {
            Ok(()) | Err(PwmError::NotFound(_)) => Ok(buf.len()),
            Err(err) => Err(err),
        }
    }

    /// Handles a write to `pwm<line>/<attr>`.
    pub fn attribute_store(&self, line: LineId, attr: Attribute, buf: &str) -> PwmResult<usize> {
        let result = self.registry.with_channel(line, |channel| {
            let value = parse_value(buf)?;
            match attr {
                Attribute::Frequency => channel.set_frequency(value),
                Attribute::DutyCycle => channel.set_duty_cycle_percent(value),
                Attribute::DutyCycleNs => channel.set_duty_cycle_ns(value),
                Attribute::PeriodNs => channel.set_period_ns(value),
            }
        });

        match result {
            Ok(()) => Ok(buf.len()),
            Err(err) if err.is_invalid_input() => Ok(dropped_write(attr.name(), err, buf)),
            Err(err) => Err(err),
        }
    }

    /// Handles a read of `pwm<line>/<attr>`. The value ends with a newline.
    pub fn attribute_show(&self, line: LineId, attr: Attribute) -> PwmResult<String> {
        if !attr.readable() {
            return Err(PwmError::WriteOnly(attr.name()));
        }

        self.registry.with_channel(line, |channel| {
            let value = match attr {
                Attribute::PeriodNs => channel.period_ns(),
                _ => channel.duty_cycle_ns(),
            };
            Ok(format!("{value}\n"))
        })
    }

    /// Writes `buf` to the node at `path`.
    pub fn store(&self, path: &str, buf: &str) -> PwmResult<usize> {
        match path.parse::<Node>()? {
            Node::Export => self.export_store(buf),
            Node::Unexport => self.unexport_store(buf),
            Node::Channel(line, attr) => self.attribute_store(line, attr, buf),
        }
    }

    /// Reads the node at `path`.
    pub fn show(&self, path: &str) -> PwmResult<String> {
        match path.parse::<Node>()? {
            Node::Export => Err(PwmError::WriteOnly("export")),
            Node::Unexport => Err(PwmError::WriteOnly("unexport")),
            Node::Channel(line, attr) => self.attribute_show(line, attr),
        }
    }
}

fn dropped_write(attribute: &str, err: impl fmt::Display, buf: &str) -> usize {
    warn!("{attribute}: ignoring write: {err}");
    buf.len()
}
