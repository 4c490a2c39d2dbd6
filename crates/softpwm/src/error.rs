//! Error types shared by the channel engine, the registry and the attribute
//! class.

use thiserror::Error;

use crate::output::{LineId, OutputError};

/// Rejected configuration value. The write is skipped and prior state kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("cannot parse `{0}` as a decimal integer")]
    Parse(String),
    #[error("period must be non-zero")]
    ZeroPeriod,
    #[error("frequency must be between 1 and 1000000000 Hz, got {hz}")]
    Frequency { hz: u64 },
    #[error("duty cycle {duty_ns} ns exceeds period {period_ns} ns")]
    DutyExceedsPeriod { duty_ns: u64, period_ns: u64 },
    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),
    #[error("unknown path `{0}`")]
    UnknownPath(String),
}

#[derive(Error, Debug)]
pub enum PwmError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(InputError),
    #[error("line {0} is already exported")]
    AlreadyExists(LineId),
    #[error("line {0} is not exported")]
    NotFound(LineId),
    #[error("line {line} is unavailable: {source}")]
    ResourceUnavailable {
        line: LineId,
        #[source]
        source: OutputError,
    },
    #[error("cannot allocate a channel for line {0}")]
    AllocationFailure(LineId),
    #[error("attribute `{0}` is write-only")]
    WriteOnly(&'static str),
}

impl PwmError {
    /// True for errors that leave every piece of state untouched and are
    /// reported as a successful no-op on the attribute surface.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

pub type PwmResult<T> = Result<T, PwmError>;
