//! GPIO lines through the legacy `/sys/class/gpio` interface.
//!
//! Acquiring a line writes its number to `export`, switches the new
//! `gpio<N>/direction` to `low` (output, initially low) and keeps
//! `gpio<N>/value` open so level changes are a single positioned write.
//! Releasing writes the number to `unexport`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use softpwm::{DigitalOutput, Level, LineId, OutputBackend, OutputError};

use crate::PortError;

pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Linux `EBUSY`: the line is already requested.
const EBUSY: i32 = 16;

/// Output backend over a sysfs GPIO tree.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    /// Opens the tree at `root`, which must contain an `export` node.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PortError> {
        let root = root.into();
        if let Err(source) = fs::metadata(root.join("export")) {
            return Err(PortError::SysfsRoot { root, source });
        }
        Ok(Self { root })
    }

    /// Opens [`DEFAULT_GPIO_ROOT`].
    pub fn system() -> Result<Self, PortError> {
        Self::open(DEFAULT_GPIO_ROOT)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn line_dir(&self, line: LineId) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    fn write_node(&self, node: &str, line: LineId) -> io::Result<()> {
        fs::write(self.root.join(node), line.to_string())
    }

    fn configure(&self, line: LineId) -> Result<File, OutputError> {
        let dir = self.line_dir(line);
        fs::write(dir.join("direction"), "low").map_err(|err| classify(line, err))?;
        OpenOptions::new()
            .write(true)
            .open(dir.join("value"))
            .map_err(|err| classify(line, err))
    }
}

/// Maps an errno from the sysfs nodes onto the output error kinds.
fn classify(line: LineId, err: io::Error) -> OutputError {
    if err.raw_os_error() == Some(EBUSY) {
        return OutputError::Busy(line);
    }
    match err.kind() {
        ErrorKind::InvalidInput | ErrorKind::NotFound => OutputError::InvalidLine(line),
        _ => OutputError::Io(err),
    }
}

impl OutputBackend for SysfsGpio {
    type Output = SysfsLine;

    fn acquire(&self, line: LineId, label: &str) -> Result<SysfsLine, OutputError> {
        self.write_node("export", line)
            .map_err(|err| classify(line, err))?;

        let value = match self.configure(line) {
            Ok(value) => value,
            Err(err) => {
                if let Err(undo) = self.write_node("unexport", line) {
                    debug!("gpio{line}: unexport after failed setup: {undo}");
                }
                return Err(err);
            }
        };

        info!("gpio{line} claimed by {label}");
        Ok(SysfsLine {
            line,
            value,
            faulted: AtomicBool::new(false),
        })
    }

    fn release(&self, output: &SysfsLine) {
        let line = output.line;
        match self.write_node("unexport", line) {
            Ok(()) => info!("gpio{line} released"),
            Err(err) => warn!("gpio{line}: unexport failed: {err}"),
        }
    }
}

/// Exported sysfs line with its value node held open.
#[derive(Debug)]
pub struct SysfsLine {
    line: LineId,
    value: File,
    faulted: AtomicBool,
}

impl DigitalOutput for SysfsLine {
    fn line(&self) -> LineId {
        self.line
    }

    fn set(&self, level: Level) {
        let byte: &[u8] = if level.is_high() { b"1" } else { b"0" };
        match self.value.write_all_at(byte, 0) {
            Ok(()) => self.faulted.store(false, Ordering::Relaxed),
            // Reported once per run of failures; this runs in timer context.
            Err(err) => {
                if !self.faulted.swap(true, Ordering::Relaxed) {
                    warn!("gpio{}: value write failed: {err}", self.line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Fake sysfs tree under the target temp dir, removed on drop.
    struct FakeTree {
        root: PathBuf,
    }

    impl FakeTree {
        fn new(lines: &[u32]) -> Self {
            static NEXT: AtomicUsize = AtomicUsize::new(0);
            let root = std::env::temp_dir().join(format!(
                "softpwm-sysfs-{}-{}",
                std::process::id(),
                NEXT.fetch_add(1, Ordering::SeqCst)
            ));
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("export"), "").unwrap();
            fs::write(root.join("unexport"), "").unwrap();
            for line in lines {
                let dir = root.join(format!("gpio{line}"));
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("direction"), "in").unwrap();
                fs::write(dir.join("value"), "0").unwrap();
            }
            Self { root }
        }

        fn read(&self, node: &str) -> String {
            fs::read_to_string(self.root.join(node)).unwrap()
        }
    }

    impl Drop for FakeTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn open_requires_export_node() {
        let missing = std::env::temp_dir().join("softpwm-sysfs-missing");
        assert!(matches!(
            SysfsGpio::open(&missing),
            Err(PortError::SysfsRoot { .. })
        ));
    }

    #[test]
    fn acquire_exports_and_drives_low() {
        let tree = FakeTree::new(&[17]);
        let gpio = SysfsGpio::open(&tree.root).unwrap();

        let line = gpio.acquire(LineId(17), "soft_pwm_gpio").unwrap();
        assert_eq!(tree.read("export"), "17");
        assert_eq!(tree.read("gpio17/direction"), "low");

        line.set(Level::High);
        assert_eq!(tree.read("gpio17/value"), "1");
        line.set(Level::Low);
        assert_eq!(tree.read("gpio17/value"), "0");

        gpio.release(&line);
        assert_eq!(tree.read("unexport"), "17");
    }

    #[test]
    fn missing_line_is_invalid_and_undone() {
        let tree = FakeTree::new(&[]);
        let gpio = SysfsGpio::open(&tree.root).unwrap();

        assert!(matches!(
            gpio.acquire(LineId(5), "soft_pwm_gpio"),
            Err(OutputError::InvalidLine(LineId(5)))
        ));
        assert_eq!(tree.read("unexport"), "5");
    }

    #[test]
    fn errno_mapping() {
        let line = LineId(3);
        assert!(matches!(
            classify(line, io::Error::from_raw_os_error(EBUSY)),
            OutputError::Busy(_)
        ));
        assert!(matches!(
            classify(line, io::Error::from(ErrorKind::InvalidInput)),
            OutputError::InvalidLine(_)
        ));
        assert!(matches!(
            classify(line, io::Error::from(ErrorKind::PermissionDenied)),
            OutputError::Io(_)
        ));
    }
}
