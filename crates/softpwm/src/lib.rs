//! # softpwm
//!
//! Software PWM on plain digital output lines. Each channel toggles its line
//! from a pair of high-resolution timers, so any GPIO can carry a waveform of
//! configurable period and duty cycle without a PWM peripheral.
//!
//! ## Module Overview
//! - [`output`]   – Digital output traits implemented by line backends.
//! - [`timer`]    – One-shot timer traits with drift-free forwarding.
//! - [`channel`]  – Dual-timer waveform engine.
//! - [`registry`] – Line-to-channel map with safe teardown.
//! - [`class`]    – sysfs-style text attributes over the registry.
//! - [`config`]   – Channel defaults and limits.
//! - [`sim`]      – Virtual-time timers and recording output lines.
//!
//! Backends for a real host live in the `softpwm-posix` crate.

pub mod channel;
pub mod class;
pub mod config;
pub mod error;
pub mod output;
pub mod registry;
pub mod sim;
pub mod timer;

pub use channel::{Channel, ChannelSnapshot, NSEC_PER_SEC};
pub use class::{Attribute, Node, SoftPwmClass};
pub use config::{PwmConfig, PwmConfigBuilder};
pub use error::{InputError, PwmError, PwmResult};
pub use output::{DigitalOutput, Level, LineId, OutputBackend, OutputError};
pub use registry::{ChannelOf, Registry};
pub use timer::{Clock, Expiry, TimePoint, Timer, TimerAction, TimerBackend, TimerCallback};

#[cfg(test)]
mod tests;
