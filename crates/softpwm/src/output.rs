//! Digital output abstraction.
//!
//! A PWM channel claims one output line for its whole lifetime and drives it
//! from timer callbacks. Backends therefore expose an infallible `set` that is
//! safe to call from the timer context, and keep acquisition and release on
//! the management side where failures can be reported.

use core::fmt;
use std::io;

use thiserror::Error;

/// Externally visible line identifier.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineId(pub u32);

impl LineId {
    pub const fn new(line: u32) -> Self {
        Self(line)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for LineId {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "0"),
            Self::High => write!(f, "1"),
        }
    }
}

/// Reasons a backend refuses to hand out a line.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("line {0} is claimed by another user")]
    Busy(LineId),
    #[error("line {0} does not exist")]
    InvalidLine(LineId),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A claimed output line.
///
/// `set` is called from timer callbacks: it must not block, allocate or fail.
/// Backends that can hit errors at this point swallow them.
pub trait DigitalOutput: Send + Sync + 'static {
    fn line(&self) -> LineId;

    fn set(&self, level: Level);
}

/// Source of output lines.
pub trait OutputBackend: Send + Sync + 'static {
    type Output: DigitalOutput;

    /// Claims `line` and configures it as an output.
    fn acquire(&self, line: LineId, label: &str) -> Result<Self::Output, OutputError>;

    /// Returns a line to the backend. No `set` call follows.
    fn release(&self, output: &Self::Output);
}
