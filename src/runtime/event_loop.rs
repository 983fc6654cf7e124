//! Single-threaded cooperative event loop.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Unit of work run on the loop.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Wait used by [`EventLoop::run`] when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Cancelled entries tolerated in the timer heap before it is compacted.
const MAX_DEAD_TIMERS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Deferred execution.
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Drop a pending task. Unknown or fired ids are ignored.
    fn cancel(&self, id: TimerId);
}

enum Clock {
    System(Instant),
    Manual(Mutex<Duration>),
}

impl Clock {
    fn now(&self) -> Duration {
        match self {
            Clock::System(start) => start.elapsed(),
            Clock::Manual(now) => *now.lock(),
        }
    }
}

#[derive(Default)]
struct Timers {
    queue: BinaryHeap<Reverse<(Duration, TimerId)>>,
    tasks: HashMap<TimerId, Task>,
}

impl Timers {
    /// Pop the earliest live timer due at or before `limit`.
    fn pop_due(&mut self, limit: Duration) -> Option<(Duration, Task)> {
        while let Some(Reverse((deadline, id))) = self.queue.peek().copied() {
            if deadline > limit {
                return None;
            }
            self.queue.pop();
            if let Some(task) = self.tasks.remove(&id) {
                return Some((deadline, task));
            }
        }
        None
    }

    fn cancel(&mut self, id: TimerId) {
        if self.tasks.remove(&id).is_none() {
            return;
        }
        while let Some(Reverse((_, head))) = self.queue.peek().copied() {
            if self.tasks.contains_key(&head) {
                break;
            }
            self.queue.pop();
        }
        let dead = self.queue.len().saturating_sub(self.tasks.len());
        if dead > MAX_DEAD_TIMERS && dead > self.tasks.len() {
            let tasks = &self.tasks;
            self.queue.retain(|Reverse((_, id))| tasks.contains_key(id));
        }
    }

    fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse((deadline, id))) = self.queue.peek().copied() {
            if self.tasks.contains_key(&id) {
                return Some(deadline);
            }
            self.queue.pop();
        }
        None
    }
}

struct LoopInner {
    clock: Clock,
    timers: Mutex<Timers>,
    next_timer: AtomicU64,
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    stopped: AtomicBool,
}

/// Executes posted tasks and timers one at a time.
///
/// Work may be posted from any thread, but it always runs on the thread that
/// drives the loop, so callbacks never interleave. The manual clock only moves
/// through [`EventLoop::advance`], which makes timer-driven code testable.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

impl EventLoop {
    /// Loop driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::System(Instant::now()))
    }

    /// Loop driven by a virtual clock starting at zero.
    pub fn manual() -> Self {
        Self::with_clock(Clock::Manual(Mutex::new(Duration::ZERO)))
    }

    fn with_clock(clock: Clock) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(LoopInner {
                clock,
                timers: Mutex::new(Timers::default()),
                next_timer: AtomicU64::new(1),
                sender,
                receiver,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Time since the loop was created.
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Queue a task to run on the next turn.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        // The loop owns the receiver, so the channel never disconnects.
        let _ = self.inner.sender.send(Box::new(task));
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().tasks.len()
    }

    /// Run posted tasks and due timers until neither is left. Returns the
    /// number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            if let Ok(task) = self.inner.receiver.try_recv() {
                task();
                ran += 1;
                continue;
            }
            let now = self.now();
            let due = self.inner.timers.lock().pop_due(now);
            match due {
                Some((_, task)) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move the clock forward by `by`, firing timers in deadline order with
    /// the clock set to each deadline. On a system clock this sleeps instead.
    pub fn advance(&self, by: Duration) -> usize {
        let Clock::Manual(now) = &self.inner.clock else {
            std::thread::sleep(by);
            return self.run_until_idle();
        };

        let target = *now.lock() + by;
        let mut ran = self.run_until_idle();
        loop {
            let due = self.inner.timers.lock().pop_due(target);
            let Some((deadline, task)) = due else {
                break;
            };
            {
                let mut current = now.lock();
                if deadline > *current {
                    *current = deadline;
                }
            }
            trace!(deadline_ms = deadline.as_millis() as u64, "firing timer");
            task();
            ran += 1;
            ran += self.run_until_idle();
        }
        *now.lock() = target;
        ran + self.run_until_idle()
    }

    /// Drive the loop on the current thread until [`EventLoop::stop`].
    pub fn run(&self) {
        self.inner.stopped.store(false, Ordering::SeqCst);
        while !self.inner.stopped.load(Ordering::SeqCst) {
            self.run_until_idle();

            let wait = {
                let mut timers = self.inner.timers.lock();
                timers
                    .next_deadline()
                    .map(|deadline| deadline.saturating_sub(self.now()))
                    .unwrap_or(IDLE_WAIT)
            };
            match self.inner.receiver.recv_timeout(wait) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Ask [`EventLoop::run`] to return after the current turn.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        // Wake a loop blocked in recv_timeout.
        self.post(|| {});
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.inner.next_timer.fetch_add(1, Ordering::SeqCst));
        let deadline = self.now() + delay;
        let mut timers = self.inner.timers.lock();
        timers.queue.push(Reverse((deadline, id)));
        timers.tasks.insert(id, task);
        id
    }

    fn cancel(&self, id: TimerId) {
        self.inner.timers.lock().cancel(id);
    }
}
