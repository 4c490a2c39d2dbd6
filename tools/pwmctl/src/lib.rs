//! Line-oriented management plane for software PWM channels.
//!
//! The same [`Session`] serves the interactive console and any number of TCP
//! command connections; see [`command::HELP`] for the command set.

pub mod command;
pub mod session;

pub use command::{Command, CommandError};
pub use session::{Reply, Session, SessionError, StreamEnd};
