//! High-resolution timer abstraction.
//!
//! Timers are one-shot and relative: `start(delay)` arms the timer to expire
//! `delay` nanoseconds from now. The expiry callback decides whether the timer
//! runs again by returning [`TimerAction::Restart`] after moving the deadline
//! forward with [`Expiry::forward`]. Periodic timers built this way keep their
//! phase: the next deadline is computed from the previous deadline rather than
//! from the time the callback happened to run.

use core::fmt;
use core::ops::Add;

/// Monotonic instant, nanoseconds since the backend's epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(u64);

impl TimePoint {
    pub const ZERO: Self = Self(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Nanoseconds from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_since(self, earlier: TimePoint) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<u64> for TimePoint {
    type Output = TimePoint;

    fn add(self, nanos: u64) -> TimePoint {
        TimePoint(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Value returned by an expiry callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Re-arm at [`Expiry::deadline`].
    Restart,
    /// Leave the timer idle.
    Stop,
}

/// Context handed to an expiry callback.
#[derive(Debug, Clone, Copy)]
pub struct Expiry {
    deadline: TimePoint,
    now: TimePoint,
}

impl Expiry {
    pub fn new(deadline: TimePoint, now: TimePoint) -> Self {
        Self { deadline, now }
    }

    /// The instant the timer was scheduled to expire.
    pub fn deadline(&self) -> TimePoint {
        self.deadline
    }

    /// Backend time when the callback was entered.
    pub fn now(&self) -> TimePoint {
        self.now
    }

    /// Moves the deadline forward by whole multiples of `interval` until it
    /// lies after `now`, and returns how many intervals were added.
    ///
    /// A return value above one means periods were missed. Nothing moves if
    /// the deadline is already in the future or `interval` is zero.
    pub fn forward(&mut self, now: TimePoint, interval: u64) -> u64 {
        if interval == 0 || now < self.deadline {
            return 0;
        }
        let overruns = now.saturating_since(self.deadline) / interval + 1;
        self.deadline = self.deadline + overruns.saturating_mul(interval);
        overruns
    }
}

/// Expiry callback. Runs on the backend's timer context.
pub type TimerCallback = Box<dyn Fn(&mut Expiry) -> TimerAction + Send + Sync + 'static>;

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimePoint;
}

/// Handle to a backend timer. Clones refer to the same timer.
pub trait Timer: Clone + Send + Sync + 'static {
    /// Arms the timer `delay_ns` from now, replacing any pending expiry.
    fn start(&self, delay_ns: u64);

    /// Disarms the timer. When this returns the timer is not pending and its
    /// callback is not running. Returns whether it was pending or running.
    ///
    /// Must not be called from the timer's own callback.
    fn cancel(&self) -> bool;

    fn is_pending(&self) -> bool;
}

pub trait TimerBackend: Clock + 'static {
    type Timer: Timer;

    fn create(&self, callback: TimerCallback) -> Self::Timer;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_adds_single_interval_when_on_time() {
        let mut expiry = Expiry::new(TimePoint::from_nanos(1_000), TimePoint::from_nanos(1_000));
        assert_eq!(expiry.forward(expiry.now(), 500), 1);
        assert_eq!(expiry.deadline(), TimePoint::from_nanos(1_500));
    }

    #[test]
    fn forward_keeps_phase_when_late() {
        let mut expiry = Expiry::new(TimePoint::from_nanos(1_000), TimePoint::from_nanos(1_120));
        assert_eq!(expiry.forward(expiry.now(), 500), 1);
        assert_eq!(expiry.deadline(), TimePoint::from_nanos(1_500));
    }

    #[test]
    fn forward_counts_missed_periods() {
        let mut expiry = Expiry::new(TimePoint::from_nanos(1_000), TimePoint::from_nanos(2_600));
        assert_eq!(expiry.forward(expiry.now(), 500), 4);
        assert_eq!(expiry.deadline(), TimePoint::from_nanos(3_000));
    }

    #[test]
    fn forward_ignores_future_deadline_and_zero_interval() {
        let mut expiry = Expiry::new(TimePoint::from_nanos(1_000), TimePoint::from_nanos(900));
        assert_eq!(expiry.forward(expiry.now(), 500), 0);
        assert_eq!(expiry.forward(TimePoint::from_nanos(5_000), 0), 0);
        assert_eq!(expiry.deadline(), TimePoint::from_nanos(1_000));
    }
}
