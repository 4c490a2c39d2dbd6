//! Simulation backends.
//!
//! [`VirtualTimers`] replaces wall-clock time with a clock that only moves
//! when told to, and [`SimChip`] records every level written to its lines.
//! Together they make waveforms reproducible to the nanosecond, which is what
//! the unit tests rely on; the `pwmctl` tool also uses [`SimChip`] as a
//! dry-run output backend.

mod chip;
mod timers;

pub use chip::{SimChip, SimLine, DEFAULT_HISTORY};
pub use timers::{VirtualTimer, VirtualTimers};
