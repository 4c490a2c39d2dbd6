//! Channel registry.
//!
//! The registry maps line identifiers to running channels. Structural
//! operations (create, remove, drain) run under a single lock. Attribute
//! updates only take that lock long enough to look the channel up, then hold
//! the channel's lifecycle guard so a concurrent removal waits for them.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::channel::{Channel, ChannelSnapshot};
use crate::config::PwmConfig;
use crate::error::{PwmError, PwmResult};
use crate::output::{LineId, OutputBackend};
use crate::timer::TimerBackend;

/// Channel type driven by a given pair of backends.
pub type ChannelOf<B, G> =
    Channel<<B as TimerBackend>::Timer, <G as OutputBackend>::Output>;

pub struct Registry<B: TimerBackend, G: OutputBackend> {
    timers: B,
    outputs: G,
    config: PwmConfig,
    channels: Mutex<HashMap<LineId, Arc<ChannelOf<B, G>>>>,
}

impl<B: TimerBackend, G: OutputBackend> Registry<B, G> {
    /// Creates an empty registry with the default configuration.
    pub fn new(timers: B, outputs: G) -> Self {
        Self {
            timers,
            outputs,
            config: PwmConfig::default(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(timers: B, outputs: G, config: PwmConfig) -> PwmResult<Self> {
        config.validate()?;
        Ok(Self {
            timers,
            outputs,
            config,
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PwmConfig {
        &self.config
    }

    pub fn timers(&self) -> &B {
        &self.timers
    }

    pub fn outputs(&self) -> &G {
        &self.outputs
    }

    /// Exports `line`: claims the output and starts the default waveform.
    pub fn create(&self, line: LineId) -> PwmResult<ChannelSnapshot> {
        let mut channels = self.channels.lock();
        if channels.contains_key(&line) {
            warn!("line {line} already has a channel");
            return Err(PwmError::AlreadyExists(line));
        }
        if channels.len() >= self.config.max_channels {
            warn!(
                "line {line}: channel limit of {} reached",
                self.config.max_channels
            );
            return Err(PwmError::AllocationFailure(line));
        }
        channels
            .try_reserve(1)
            .map_err(|_| PwmError::AllocationFailure(line))?;

        let output = self
            .outputs
            .acquire(line, &self.config.label)
            .map_err(|source| PwmError::ResourceUnavailable { line, source })?;

        let channel = Arc::new(Channel::new(
            &self.timers,
            output,
            self.config.default_period_ns,
            self.config.default_duty_cycle_ns,
        ));
        channel.start();

        let snapshot = channel.snapshot();
        channels.insert(line, channel);
        info!(
            "line {line} exported: period {} ns, duty cycle {} ns",
            snapshot.period_ns, snapshot.duty_cycle_ns
        );
        Ok(snapshot)
    }

    /// Unexports `line`. The output is left low and handed back to the
    /// backend. `NotFound` if the line was never exported.
    pub fn remove(&self, line: LineId) -> PwmResult<()> {
        let mut channels = self.channels.lock();
        let channel = channels.remove(&line).ok_or(PwmError::NotFound(line))?;
        self.teardown(&channel);
        drop(channels);

        info!("line {line} unexported");
        Ok(())
    }

    /// Runs `f` against the channel for `line` while holding off its removal.
    ///
    /// `f` must not call back into the registry.
    pub fn with_channel<R, F>(&self, line: LineId, f: F) -> PwmResult<R>
    where
        F: FnOnce(&ChannelOf<B, G>) -> PwmResult<R>,
    {
        let channel = self
            .channels
            .lock()
            .get(&line)
            .cloned()
            .ok_or(PwmError::NotFound(line))?;
        let _entered = channel.enter().ok_or(PwmError::NotFound(line))?;
        f(&channel)
    }

    pub fn snapshot(&self, line: LineId) -> PwmResult<ChannelSnapshot> {
        self.with_channel(line, |channel| Ok(channel.snapshot()))
    }

    /// Tears down every channel. Returns how many were removed.
    pub fn drain(&self) -> usize {
        let mut channels = self.channels.lock();
        let count = channels.len();
        for (_, channel) in channels.drain() {
            self.teardown(&channel);
        }
        if count > 0 {
            info!("released {count} channel(s)");
        }
        count
    }

    /// Exported lines in ascending order.
    pub fn lines(&self) -> Vec<LineId> {
        let mut lines: Vec<_> = self.channels.lock().keys().copied().collect();
        lines.sort_unstable();
        lines
    }

    pub fn contains(&self, line: LineId) -> bool {
        self.channels.lock().contains_key(&line)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    fn teardown(&self, channel: &ChannelOf<B, G>) {
        if channel.retire() {
            self.outputs.release(channel.output());
        }
    }
}

impl<B: TimerBackend, G: OutputBackend> Drop for Registry<B, G> {
    fn drop(&mut self) {
        self.drain();
    }
}
