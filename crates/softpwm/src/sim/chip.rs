//! In-memory output lines with edge recording.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::output::{DigitalOutput, Level, LineId, OutputBackend, OutputError};
use crate::timer::{Clock, TimePoint};

/// Edges kept per line before the oldest are folded away.
pub const DEFAULT_HISTORY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Free,
    Reserved(String),
    Claimed(String),
}

struct LineTrace {
    /// Level in force from this instant until the first recorded edge.
    origin: (TimePoint, Level),
    edges: VecDeque<(TimePoint, Level)>,
    limit: usize,
    writes: u64,
    toggles: u64,
}

impl LineTrace {
    fn new(at: TimePoint, limit: usize) -> Self {
        Self {
            origin: (at, Level::Low),
            edges: VecDeque::new(),
            limit: limit.max(1),
            writes: 0,
            toggles: 0,
        }
    }

    fn level(&self) -> Level {
        self.edges.back().map_or(self.origin.1, |edge| edge.1)
    }

    fn record(&mut self, at: TimePoint, level: Level) {
        self.writes += 1;
        if self.level() == level {
            return;
        }
        self.toggles += 1;
        if self.edges.len() == self.limit {
            if let Some(oldest) = self.edges.pop_front() {
                self.origin = oldest;
            }
        }
        self.edges.push_back((at, level));
    }

    fn high_time(&self, from: TimePoint, to: TimePoint) -> u64 {
        let points: Vec<_> = std::iter::once(self.origin)
            .chain(self.edges.iter().copied())
            .collect();

        let mut total = 0;
        for (i, &(start, level)) in points.iter().enumerate() {
            if !level.is_high() {
                continue;
            }
            let end = points.get(i + 1).map_or(to, |next| next.0);
            let lo = start.max(from);
            let hi = end.min(to);
            total += hi.saturating_since(lo);
        }
        total
    }
}

struct LineState {
    owner: Owner,
    trace: LineTrace,
}

struct ChipInner {
    clock: Arc<dyn Clock>,
    num_lines: u32,
    history: usize,
    lines: Mutex<HashMap<LineId, LineState>>,
}

impl ChipInner {
    fn record(&self, line: LineId, level: Level) {
        let now = self.clock.now();
        if let Some(state) = self.lines.lock().get_mut(&line) {
            state.trace.record(now, level);
        }
    }
}

/// Simulated GPIO chip with lines `0..num_lines`.
///
/// Every level written is timestamped with the supplied clock so tests can
/// measure the waveform a channel produced. Clones share the same lines.
#[derive(Clone)]
pub struct SimChip {
    inner: Arc<ChipInner>,
}

impl SimChip {
    pub fn new(clock: impl Clock + 'static, num_lines: u32) -> Self {
        Self::with_history(clock, num_lines, DEFAULT_HISTORY)
    }

    pub fn with_history(clock: impl Clock + 'static, num_lines: u32, history: usize) -> Self {
        Self {
            inner: Arc::new(ChipInner {
                clock: Arc::new(clock),
                num_lines,
                history,
                lines: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn num_lines(&self) -> u32 {
        self.inner.num_lines
    }

    /// Marks `line` as taken by some other consumer. Returns false if it is
    /// already in use or does not exist.
    pub fn reserve(&self, line: LineId, owner: &str) -> bool {
        if line.0 >= self.inner.num_lines {
            return false;
        }
        let now = self.inner.clock.now();
        let mut lines = self.inner.lines.lock();
        let state = lines.entry(line).or_insert_with(|| LineState {
            owner: Owner::Free,
            trace: LineTrace::new(now, self.inner.history),
        });
        if state.owner != Owner::Free {
            return false;
        }
        state.owner = Owner::Reserved(owner.to_owned());
        true
    }

    /// Undoes [`reserve`](Self::reserve).
    pub fn unreserve(&self, line: LineId) {
        if let Some(state) = self.inner.lines.lock().get_mut(&line) {
            if matches!(state.owner, Owner::Reserved(_)) {
                state.owner = Owner::Free;
            }
        }
    }

    pub fn is_claimed(&self, line: LineId) -> bool {
        self.inner
            .lines
            .lock()
            .get(&line)
            .is_some_and(|state| state.owner != Owner::Free)
    }

    /// Label of the current owner, if any.
    pub fn owner(&self, line: LineId) -> Option<String> {
        match &self.inner.lines.lock().get(&line)?.owner {
            Owner::Free => None,
            Owner::Reserved(label) | Owner::Claimed(label) => Some(label.clone()),
        }
    }

    pub fn level(&self, line: LineId) -> Option<Level> {
        self.inner
            .lines
            .lock()
            .get(&line)
            .map(|state| state.trace.level())
    }

    /// Recorded level changes, oldest first.
    pub fn edges(&self, line: LineId) -> Vec<(TimePoint, Level)> {
        self.inner
            .lines
            .lock()
            .get(&line)
            .map(|state| state.trace.edges.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Level changes since the line was last claimed.
    pub fn toggles(&self, line: LineId) -> u64 {
        self.inner
            .lines
            .lock()
            .get(&line)
            .map_or(0, |state| state.trace.toggles)
    }

    /// Writes since the line was last claimed, including ones that kept the
    /// level unchanged.
    pub fn writes(&self, line: LineId) -> u64 {
        self.inner
            .lines
            .lock()
            .get(&line)
            .map_or(0, |state| state.trace.writes)
    }

    /// Nanoseconds the line spent high within `[from, to)`.
    pub fn high_time(&self, line: LineId, from: TimePoint, to: TimePoint) -> u64 {
        self.inner
            .lines
            .lock()
            .get(&line)
            .map_or(0, |state| state.trace.high_time(from, to))
    }

    /// Fraction of `[from, to)` the line spent high.
    pub fn high_ratio(&self, line: LineId, from: TimePoint, to: TimePoint) -> f64 {
        let window = to.saturating_since(from);
        if window == 0 {
            return 0.0;
        }
        self.high_time(line, from, to) as f64 / window as f64
    }
}

impl OutputBackend for SimChip {
    type Output = SimLine;

    fn acquire(&self, line: LineId, label: &str) -> Result<SimLine, OutputError> {
        if line.0 >= self.inner.num_lines {
            return Err(OutputError::InvalidLine(line));
        }
        let now = self.inner.clock.now();
        let mut lines = self.inner.lines.lock();
        let state = lines.entry(line).or_insert_with(|| LineState {
            owner: Owner::Free,
            trace: LineTrace::new(now, self.inner.history),
        });
        if state.owner != Owner::Free {
            return Err(OutputError::Busy(line));
        }
        state.owner = Owner::Claimed(label.to_owned());
        state.trace = LineTrace::new(now, self.inner.history);

        Ok(SimLine {
            line,
            chip: Arc::clone(&self.inner),
        })
    }

    fn release(&self, output: &SimLine) {
        if let Some(state) = self.inner.lines.lock().get_mut(&output.line) {
            state.owner = Owner::Free;
        }
    }
}

/// Line claimed from a [`SimChip`].
pub struct SimLine {
    line: LineId,
    chip: Arc<ChipInner>,
}

impl DigitalOutput for SimLine {
    fn line(&self) -> LineId {
        self.line
    }

    fn set(&self, level: Level) {
        self.chip.record(self.line, level);
    }
}
