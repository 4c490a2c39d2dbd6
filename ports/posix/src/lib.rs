//! POSIX backends for hosting software PWM channels.
//!
//! [`PosixTimers`] runs channel timers on a dedicated thread against the
//! monotonic clock and [`SysfsGpio`] drives lines through `/sys/class/gpio`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod sysfs;
pub mod timers;

pub use sysfs::{SysfsGpio, SysfsLine, DEFAULT_GPIO_ROOT};
pub use timers::{PosixTimer, PosixTimers};

use softpwm::Registry;

/// Registry wired to the host timer service and sysfs GPIO.
pub type PosixRegistry = Registry<PosixTimers, SysfsGpio>;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("cannot start timer dispatcher: {0}")]
    Spawn(#[source] io::Error),
    #[error("gpio sysfs tree at {} is not usable: {source}", root.display())]
    SysfsRoot {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
}
