//! Monotonic timer service for POSIX
//!
//! A single dispatcher thread owns a deadline queue and sleeps until the
//! earliest absolute deadline, so a periodic timer forwarded from its previous
//! deadline never accumulates drift. Callbacks run on the dispatcher thread
//! with no lock held.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

use softpwm::{Clock, Expiry, TimePoint, Timer, TimerAction, TimerBackend, TimerCallback};

use crate::PortError;

type TimerId = u64;

/// Queue entry: deadline, arming sequence, timer, generation at arming.
type Entry = Reverse<(TimePoint, u64, TimerId, u64)>;

struct Slot {
    callback: Arc<TimerCallback>,
    armed: bool,
    generation: u64,
}

#[derive(Default)]
struct State {
    next_id: TimerId,
    next_seq: u64,
    queue: BinaryHeap<Entry>,
    timers: HashMap<TimerId, Slot>,
    running: Option<TimerId>,
    shutdown: bool,
}

impl State {
    fn arm(&mut self, id: TimerId, deadline: TimePoint) {
        let Some(slot) = self.timers.get_mut(&id) else {
            return;
        };
        slot.generation += 1;
        slot.armed = true;
        let generation = slot.generation;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((deadline, seq, id, generation)));
    }

    /// True if the queue entry still describes the timer's current arming.
    fn is_live(&self, id: TimerId, generation: u64) -> bool {
        self.timers
            .get(&id)
            .is_some_and(|slot| slot.armed && slot.generation == generation)
    }
}

struct Shared {
    epoch: Instant,
    state: Mutex<State>,
    /// Signalled when the earliest deadline may have moved.
    wake: Condvar,
    /// Signalled after every callback returns.
    idle: Condvar,
    dispatcher: OnceLock<ThreadId>,
}

impl Shared {
    fn now(&self) -> TimePoint {
        let elapsed = self.epoch.elapsed().as_nanos();
        TimePoint::from_nanos(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }

    fn instant(&self, at: TimePoint) -> Instant {
        self.epoch + Duration::from_nanos(at.as_nanos())
    }

    fn on_dispatcher(&self) -> bool {
        self.dispatcher.get() == Some(&thread::current().id())
    }
}

/// Owns the dispatcher thread; stops and joins it when the last
/// [`PosixTimers`] clone goes away.
struct Dispatcher {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if self.shared.on_dispatcher() {
                return;
            }
            let _ = handle.join();
        }
        debug!("timer dispatcher stopped");
    }
}

/// Timer backend running callbacks on a dedicated thread against the
/// monotonic clock.
///
/// Clones share the same dispatcher. Time is measured from the moment the
/// backend was created.
#[derive(Clone)]
pub struct PosixTimers {
    shared: Arc<Shared>,
    _dispatcher: Arc<Dispatcher>,
}

impl PosixTimers {
    /// Spawns the dispatcher thread.
    pub fn new() -> Result<Self, PortError> {
        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            dispatcher: OnceLock::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("softpwm-timers".into())
            .spawn(move || dispatch(&worker))
            .map_err(PortError::Spawn)?;
        let _ = shared.dispatcher.set(handle.thread().id());
        debug!("timer dispatcher started");

        Ok(Self {
            _dispatcher: Arc::new(Dispatcher {
                shared: Arc::clone(&shared),
                thread: Mutex::new(Some(handle)),
            }),
            shared,
        })
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .timers
            .values()
            .filter(|slot| slot.armed)
            .count()
    }
}

/// Dispatcher thread body.
///
/// Sleeps until the earliest absolute deadline rather than for a relative
/// duration, then fires every timer that is due.
fn dispatch(shared: &Shared) {
    let mut state = shared.state.lock();
    while !state.shutdown {
        let Some(&Reverse((deadline, _, id, generation))) = state.queue.peek() else {
            shared.wake.wait(&mut state);
            continue;
        };
        if !state.is_live(id, generation) {
            state.queue.pop();
            continue;
        }
        if deadline > shared.now() {
            let at = shared.instant(deadline);
            shared.wake.wait_until(&mut state, at);
            continue;
        }

        state.queue.pop();
        fire(shared, &mut state, id, deadline);
    }
}

fn fire(shared: &Shared, state: &mut MutexGuard<'_, State>, id: TimerId, deadline: TimePoint) {
    let Some(slot) = state.timers.get_mut(&id) else {
        return;
    };
    slot.armed = false;
    let generation = slot.generation;
    let callback = Arc::clone(&slot.callback);
    state.running = Some(id);

    let (action, next) = MutexGuard::unlocked(state, || {
        let now = shared.now();
        trace!("timer {id} fired {} ns late", now.saturating_since(deadline));
        let mut expiry = Expiry::new(deadline, now);
        let action = callback(&mut expiry);
        drop(callback);
        (action, expiry.deadline())
    });

    state.running = None;
    let unchanged = state
        .timers
        .get(&id)
        .is_some_and(|slot| slot.generation == generation);
    if action == TimerAction::Restart && unchanged {
        state.arm(id, next);
    }
    shared.idle.notify_all();
}

impl Clock for PosixTimers {
    fn now(&self) -> TimePoint {
        self.shared.now()
    }
}

impl TimerBackend for PosixTimers {
    type Timer = PosixTimer;

    fn create(&self, callback: TimerCallback) -> PosixTimer {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            Slot {
                callback: Arc::new(callback),
                armed: false,
                generation: 0,
            },
        );
        PosixTimer {
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

/// One-shot timer created by [`PosixTimers`].
#[derive(Clone)]
pub struct PosixTimer {
    handle: Arc<Handle>,
}

impl Timer for PosixTimer {
    fn start(&self, delay_ns: u64) {
        let shared = &self.handle.shared;
        let deadline = shared.now() + delay_ns;
        shared.state.lock().arm(self.handle.id, deadline);
        shared.wake.notify_one();
    }

    /// Disarms the timer. When its callback is running on another thread,
    /// waits for it to return.
    fn cancel(&self) -> bool {
        let id = self.handle.id;
        let shared = &self.handle.shared;
        let mut state = shared.state.lock();
        let mut active = state.running == Some(id);
        if let Some(slot) = state.timers.get_mut(&id) {
            active |= slot.armed;
            slot.armed = false;
            slot.generation += 1;
        }
        if !shared.on_dispatcher() {
            while state.running == Some(id) {
                shared.idle.wait(&mut state);
            }
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
            .is_some_and(|slot| slot.armed)
    }
}
