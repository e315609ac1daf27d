//! Frame and timer scheduling seam.
//!
//! Decision passes run at frame boundaries and the pass gate reopens on a
//! timer, so the coordinator takes its notion of time from a [`Scheduler`].
//! [`TokioScheduler`] defers to a Tokio runtime; [`ManualScheduler`] is a
//! virtual clock that tests step explicitly.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

/// Deferred unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default frame cadence, roughly 60Hz
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Time source and executor for the coordinator.
///
/// Implementations run tasks without holding internal locks, so a task may
/// schedule further work.
pub trait Scheduler: Send + Sync {
    /// Run `task` at the next frame boundary
    fn schedule_frame(&self, task: Task);

    /// Run `task` once `delay` has elapsed
    fn schedule_after(&self, delay: Duration, task: Task);

    /// Drive `future` to completion off the caller's stack
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Scheduler backed by a Tokio runtime
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    frame_interval: Duration,
}

impl TokioScheduler {
    /// Capture the current runtime with the default frame cadence.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_frame_interval(DEFAULT_FRAME_INTERVAL)
    }

    /// Capture the current runtime with a custom frame cadence.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_frame_interval(frame_interval: Duration) -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            frame_interval,
        }
    }

    /// Use an explicit runtime handle
    pub fn with_handle(handle: tokio::runtime::Handle, frame_interval: Duration) -> Self {
        Self {
            handle,
            frame_interval,
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_frame(&self, task: Task) {
        let interval = self.frame_interval;
        self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            task();
        });
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.handle.spawn(future);
    }
}

struct TimerSlot {
    due: Duration,
    seq: u64,
    task: Task,
}

impl PartialEq for TimerSlot {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerSlot {}

impl PartialOrd for TimerSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct ManualState {
    now: Duration,
    frame_interval: Duration,
    timers: BinaryHeap<Reverse<TimerSlot>>,
    ready: Vec<BoxFuture<'static, ()>>,
    next_seq: u64,
}

/// Virtual-clock scheduler for deterministic tests.
///
/// Nothing runs until the clock is stepped with [`advance`](Self::advance) or
/// [`run_frame`](Self::run_frame); spawned futures wait for
/// [`run_tasks`](Self::run_tasks). Timers due at the same instant run in
/// schedule order.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::with_frame_interval(DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_frame_interval(frame_interval: Duration) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                frame_interval,
                timers: BinaryHeap::new(),
                ready: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().unwrap().now
    }

    pub fn frame_interval(&self) -> Duration {
        self.state.lock().unwrap().frame_interval
    }

    /// Step the clock forward, running every timer that falls due.
    ///
    /// Timers run without the scheduler lock held, so a timer that schedules
    /// more work inside the same window cascades within this call.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().unwrap().now + by;
        loop {
            let task = {
                let mut guard = self.state.lock().unwrap();
                let state = &mut *guard;
                let due = state
                    .timers
                    .peek()
                    .map_or(false, |Reverse(slot)| slot.due <= target);
                if due {
                    state.timers.pop().map(|Reverse(slot)| {
                        state.now = state.now.max(slot.due);
                        slot.task
                    })
                } else {
                    None
                }
            };
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        let mut state = self.state.lock().unwrap();
        state.now = state.now.max(target);
    }

    /// Advance by exactly one frame interval
    pub fn run_frame(&self) {
        let interval = self.frame_interval();
        self.advance(interval);
    }

    /// Block on every spawned future until none remain. Returns how many ran.
    ///
    /// Futures that wait on held play requests must be resolved before this
    /// is called or it will not return.
    pub fn run_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let ready = std::mem::take(&mut self.state.lock().unwrap().ready);
            if ready.is_empty() {
                break;
            }
            ran += ready.len();
            for future in ready {
                futures::executor::block_on(future);
            }
        }
        ran
    }

    pub fn pending_timers(&self) -> usize {
        self.state.lock().unwrap().timers.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_frame(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        let due = state.now + state.frame_interval;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(Reverse(TimerSlot { due, seq, task }));
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock().unwrap();
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(Reverse(TimerSlot { due, seq, task }));
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.state.lock().unwrap().ready.push(future);
    }
}
