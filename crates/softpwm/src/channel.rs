//! Dual-timer waveform engine.
//!
//! Every channel owns two timers. The *rising* timer is the period heartbeat:
//! it fires once per period, drives the line high and arms the *falling*
//! timer, which drives the line low again after `duty_cycle_ns`. The rising
//! timer re-arms itself relative to its previous deadline, so scheduling
//! latency in one period does not shift the following ones.
//!
//! ```text
//!          rising          falling   rising          falling
//!            |<--- duty --->|          |<--- duty --->|
//!   ____      ______________            ______________
//!       |____|              |__________|              |____
//!            |<-------- period ------->|
//! ```
//!
//! The two degenerate duty cycles never arm the falling timer: a duty of zero
//! holds the line low and a duty equal to the period holds it high, while the
//! rising timer keeps ticking and re-asserts the same level every period.
//!
//! Timer callbacks only touch the atomics of the shared waveform state.
//! Reconfiguration is serialized by a per-channel update lock, and changes
//! that move the period cancel both timers (waiting for a running callback)
//! before restarting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::error::{InputError, PwmResult};
use crate::output::{DigitalOutput, Level, LineId};
use crate::timer::{Expiry, Timer, TimerAction, TimerBackend};

pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Point-in-time view of a channel.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub line: LineId,
    pub period_ns: u64,
    pub duty_cycle_ns: u64,
    /// Level most recently driven onto the line.
    pub high: bool,
    /// Rising edges fired by the period timer.
    pub cycles: u64,
    /// Periods skipped because the rising timer ran late.
    pub missed_periods: u64,
}

/// State shared with the timer callbacks.
struct Waveform<O> {
    output: O,
    period_ns: AtomicU64,
    duty_ns: AtomicU64,
    high: AtomicBool,
    cycles: AtomicU64,
    missed: AtomicU64,
}

impl<O: DigitalOutput> Waveform<O> {
    fn new(output: O, period_ns: u64, duty_ns: u64) -> Self {
        Self {
            output,
            period_ns: AtomicU64::new(period_ns),
            duty_ns: AtomicU64::new(duty_ns),
            high: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        }
    }

    fn period(&self) -> u64 {
        self.period_ns.load(Ordering::Acquire)
    }

    fn duty(&self) -> u64 {
        self.duty_ns.load(Ordering::Acquire)
    }

    fn drive(&self, level: Level) {
        self.output.set(level);
        self.high.store(level.is_high(), Ordering::Relaxed);
    }

    /// Opens a period.
    fn rising_edge<T: Timer>(&self, falling: &T) {
        let duty = self.duty();
        if duty == 0 {
            self.drive(Level::Low);
            return;
        }

        self.drive(Level::High);
        if duty < self.period() {
            falling.start(duty);
        }
    }

    fn on_rising(&self, expiry: &mut Expiry, falling: &impl Timer) -> TimerAction {
        let overruns = expiry.forward(expiry.now(), self.period());
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if overruns > 1 {
            self.missed.fetch_add(overruns - 1, Ordering::Relaxed);
        }
        self.rising_edge(falling);
        TimerAction::Restart
    }

    fn on_falling(&self) -> TimerAction {
        self.drive(Level::Low);
        TimerAction::Stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Running,
    Retired,
}

/// One software PWM output.
pub struct Channel<T: Timer, O: DigitalOutput> {
    line: LineId,
    wave: Arc<Waveform<O>>,
    rising: T,
    falling: T,
    update: Mutex<()>,
    lifecycle: RwLock<Lifecycle>,
}

impl<T: Timer, O: DigitalOutput> Channel<T, O> {
    /// Builds a stopped channel driving `output`.
    pub(crate) fn new<B>(backend: &B, output: O, period_ns: u64, duty_ns: u64) -> Self
    where
        B: TimerBackend<Timer = T>,
    {
        let line = output.line();
        let wave = Arc::new(Waveform::new(output, period_ns, duty_ns));

        let falling = {
            let wave = Arc::clone(&wave);
            backend.create(Box::new(move |_: &mut Expiry| wave.on_falling()))
        };
        let rising = {
            let wave = Arc::clone(&wave);
            let falling = falling.clone();
            backend.create(Box::new(move |expiry: &mut Expiry| {
                wave.on_rising(expiry, &falling)
            }))
        };

        Self {
            line,
            wave,
            rising,
            falling,
            update: Mutex::new(()),
            lifecycle: RwLock::new(Lifecycle::Running),
        }
    }

    pub fn line(&self) -> LineId {
        self.line
    }

    /// Last accepted period.
    pub fn period_ns(&self) -> u64 {
        self.wave.period()
    }

    /// Last accepted duty cycle.
    pub fn duty_cycle_ns(&self) -> u64 {
        self.wave.duty()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            line: self.line,
            period_ns: self.wave.period(),
            duty_cycle_ns: self.wave.duty(),
            high: self.wave.high.load(Ordering::Relaxed),
            cycles: self.wave.cycles.load(Ordering::Relaxed),
            missed_periods: self.wave.missed.load(Ordering::Relaxed),
        }
    }

    /// Sets the period and restarts the waveform with a fresh rising edge.
    ///
    /// A duty cycle longer than the new period is blanked to zero.
    pub fn set_period_ns(&self, period_ns: u64) -> PwmResult<()> {
        if period_ns == 0 {
            return Err(InputError::ZeroPeriod.into());
        }

        let _update = self.update.lock();
        self.halt();
        if self.wave.duty() > period_ns {
            self.wave.duty_ns.store(0, Ordering::Release);
        }
        self.wave.period_ns.store(period_ns, Ordering::Release);
        self.start();

        debug!(
            "line {}: period {} ns, duty cycle {} ns",
            self.line,
            period_ns,
            self.wave.duty()
        );
        Ok(())
    }

    /// Sets the period to `1e9 / hz` nanoseconds and restarts the waveform.
    ///
    /// A duty cycle that does not fit strictly inside the new period becomes
    /// half of it.
    pub fn set_frequency(&self, hz: u64) -> PwmResult<()> {
        if hz == 0 || hz > NSEC_PER_SEC {
            return Err(InputError::Frequency { hz }.into());
        }
        let period_ns = NSEC_PER_SEC / hz;

        let _update = self.update.lock();
        self.halt();
        if self.wave.duty() >= period_ns {
            self.wave.duty_ns.store(period_ns / 2, Ordering::Release);
        }
        self.wave.period_ns.store(period_ns, Ordering::Release);
        self.start();

        debug!(
            "line {}: frequency {} Hz, period {} ns, duty cycle {} ns",
            self.line,
            hz,
            period_ns,
            self.wave.duty()
        );
        Ok(())
    }

    /// Sets the duty cycle as a percentage of the current period. Values above
    /// 100 are treated as 100. Takes effect at the next rising edge.
    pub fn set_duty_cycle_percent(&self, percent: u64) -> PwmResult<()> {
        let percent = percent.min(100);

        let _update = self.update.lock();
        let period = u128::from(self.wave.period());
        let duty_ns = (period * u128::from(percent) / 100) as u64;
        self.wave.duty_ns.store(duty_ns, Ordering::Release);

        debug!("line {}: duty cycle {}% ({} ns)", self.line, percent, duty_ns);
        Ok(())
    }

    /// Sets the duty cycle in nanoseconds. Rejected, with no change, when it
    /// exceeds the current period.
    pub fn set_duty_cycle_ns(&self, duty_ns: u64) -> PwmResult<()> {
        let _update = self.update.lock();
        let period_ns = self.wave.period();
        if duty_ns > period_ns {
            return Err(InputError::DutyExceedsPeriod { duty_ns, period_ns }.into());
        }
        self.wave.duty_ns.store(duty_ns, Ordering::Release);

        debug!("line {}: duty cycle {} ns", self.line, duty_ns);
        Ok(())
    }

    /// Starts the waveform as if a rising edge fired now.
    pub(crate) fn start(&self) {
        self.wave.rising_edge(&self.falling);
        self.rising.start(self.wave.period());
    }

    /// Holds off teardown while a reconfiguration runs. `None` once retired.
    pub(crate) fn enter(&self) -> Option<RwLockReadGuard<'_, Lifecycle>> {
        let state = self.lifecycle.read();
        (*state == Lifecycle::Running).then_some(state)
    }

    /// Stops the waveform for good and leaves the line low. Waits for every
    /// reconfiguration that already entered. Returns false if already retired.
    pub(crate) fn retire(&self) -> bool {
        let mut state = self.lifecycle.write();
        if *state == Lifecycle::Retired {
            return false;
        }
        *state = Lifecycle::Retired;
        self.halt();
        self.wave.drive(Level::Low);
        true
    }

    pub(crate) fn output(&self) -> &O {
        &self.wave.output
    }

    /// Disarms both timers. The rising timer goes first so it cannot re-arm
    /// the falling timer behind our back.
    fn halt(&self) {
        self.rising.cancel();
        self.falling.cancel();
    }
}

impl<T: Timer, O: DigitalOutput> Drop for Channel<T, O> {
    fn drop(&mut self) {
        if *self.lifecycle.get_mut() == Lifecycle::Running {
            self.halt();
        }
    }
}
