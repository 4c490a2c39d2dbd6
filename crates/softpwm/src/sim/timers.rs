//! Virtual-time timer backend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::timer::{Clock, Expiry, TimePoint, Timer, TimerAction, TimerBackend, TimerCallback};

type TimerId = u64;

struct Slot {
    callback: Arc<TimerCallback>,
    /// Deadline and arming sequence number, `None` while idle.
    deadline: Option<(TimePoint, u64)>,
    generation: u64,
}

#[derive(Default)]
struct State {
    now: TimePoint,
    next_id: TimerId,
    next_seq: u64,
    /// Callbacks in flight per timer. Several threads may be advancing.
    running: HashMap<TimerId, usize>,
    timers: HashMap<TimerId, Slot>,
}

impl State {
    fn arm(&mut self, id: TimerId, deadline: TimePoint) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(slot) = self.timers.get_mut(&id) {
            slot.deadline = Some((deadline, seq));
            slot.generation += 1;
        }
    }

    /// Earliest timer due at or before `limit`, ties broken by arming order.
    fn next_due(&self, limit: TimePoint) -> Option<(TimePoint, TimerId)> {
        self.timers
            .iter()
            .filter_map(|(id, slot)| slot.deadline.map(|(at, seq)| (at, seq, *id)))
            .filter(|(at, _, _)| *at <= limit)
            .min()
            .map(|(at, _, id)| (at, id))
    }

    fn is_running(&self, id: TimerId) -> bool {
        self.running.contains_key(&id)
    }

    fn leave(&mut self, id: TimerId) {
        if let Some(count) = self.running.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.running.remove(&id);
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    idle: Condvar,
}

/// Deterministic timer backend driven by [`advance`](Self::advance).
///
/// Time only moves when the owner advances it; due callbacks then run on the
/// advancing thread in deadline order. Clones share the same clock.
///
/// Any number of threads may call `advance` at once, and `cancel` still waits
/// for every in-flight callback of its timer. Deadline order across callbacks
/// only holds while a single thread drives the clock.
#[derive(Clone, Default)]
pub struct VirtualTimers {
    shared: Arc<Shared>,
}

impl VirtualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `nanos`, firing everything that falls due.
    /// Returns the number of callbacks run.
    pub fn advance(&self, nanos: u64) -> usize {
        let target = self.now() + nanos;
        self.advance_to(target)
    }

    pub fn advance_to(&self, target: TimePoint) -> usize {
        let mut fired = 0;
        while self.fire_next(target) {
            fired += 1;
        }
        let mut state = self.shared.state.lock();
        if state.now < target {
            state.now = target;
        }
        fired
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .timers
            .values()
            .filter(|slot| slot.deadline.is_some())
            .count()
    }

    fn fire_next(&self, limit: TimePoint) -> bool {
        let mut state = self.shared.state.lock();
        let Some((deadline, id)) = state.next_due(limit) else {
            return false;
        };
        if state.now < deadline {
            state.now = deadline;
        }
        let now = state.now;
        let (callback, generation) = match state.timers.get_mut(&id) {
            Some(slot) => {
                slot.deadline = None;
                (Arc::clone(&slot.callback), slot.generation)
            }
            None => return false,
        };
        *state.running.entry(id).or_default() += 1;
        drop(state);

        let mut expiry = Expiry::new(deadline, now);
        let action = callback(&mut expiry);
        drop(callback);

        let mut state = self.shared.state.lock();
        state.leave(id);
        let rearm = action == TimerAction::Restart
            && state
                .timers
                .get(&id)
                .is_some_and(|slot| slot.generation == generation);
        if rearm {
            state.arm(id, expiry.deadline());
        }
        drop(state);
        self.shared.idle.notify_all();
        true
    }
}

impl Clock for VirtualTimers {
    fn now(&self) -> TimePoint {
        self.shared.state.lock().now
    }
}

impl TimerBackend for VirtualTimers {
    type Timer = VirtualTimer;

    fn create(&self, callback: TimerCallback) -> VirtualTimer {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            Slot {
                callback: Arc::new(callback),
                deadline: None,
                generation: 0,
            },
        );
        VirtualTimer {
            handle: Arc::new(Handle {
                id,
                shared: Arc::clone(&self.shared),
            }),
        }
    }
}

struct Handle {
    id: TimerId,
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        let slot = self.shared.state.lock().timers.remove(&self.id);
        drop(slot);
    }
}

/// Timer created by [`VirtualTimers`].
#[derive(Clone)]
pub struct VirtualTimer {
    handle: Arc<Handle>,
}

impl Timer for VirtualTimer {
    fn start(&self, delay_ns: u64) {
        let mut state = self.handle.shared.state.lock();
        let deadline = state.now + delay_ns;
        state.arm(self.handle.id, deadline);
    }

    fn cancel(&self) -> bool {
        let id = self.handle.id;
        let mut state = self.handle.shared.state.lock();
        let mut active = state.is_running(id);
        if let Some(slot) = state.timers.get_mut(&id) {
            active |= slot.deadline.take().is_some();
            slot.generation += 1;
        }
        while state.is_running(id) {
            self.handle.shared.idle.wait(&mut state);
        }
        active
    }

    fn is_pending(&self) -> bool {
        self.handle
            .shared
            .state
            .lock()
            .timers
            .get(&self.handle.id)
            .is_some_and(|slot| slot.deadline.is_some())
    }
}
