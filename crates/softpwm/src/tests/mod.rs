use crate::config::PwmConfig;
use crate::output::LineId;
use crate::registry::Registry;
use crate::sim::{SimChip, VirtualTimers};
use crate::timer::TimePoint;

mod class;

const MS: u64 = 1_000_000;

struct Bench {
    timers: VirtualTimers,
    chip: SimChip,
    registry: Registry<VirtualTimers, SimChip>,
}

impl Bench {
    fn new() -> Self {
        Self::with_config(PwmConfig::default())
    }

    fn with_config(config: PwmConfig) -> Self {
        let timers = VirtualTimers::new();
        let chip = SimChip::new(timers.clone(), 32);
        let registry = Registry::with_config(timers.clone(), chip.clone(), config)
            .expect("config should be valid");
        Self {
            timers,
            chip,
            registry,
        }
    }

    fn now(&self) -> TimePoint {
        use crate::timer::Clock;
        self.timers.now()
    }

    /// Runs for `nanos` and returns the high ratio of `line` over that span.
    fn measure(&self, line: LineId, nanos: u64) -> f64 {
        let start = self.now();
        self.timers.advance(nanos);
        self.chip.high_ratio(line, start, self.now())
    }
}

fn assert_ratio(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected high ratio {expected}, got {actual}"
    );
}
