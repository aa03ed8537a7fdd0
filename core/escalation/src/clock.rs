//! Schedulable clock abstraction.
//!
//! Every wait in the controller is a cancellable scheduled callback against
//! this trait, never a blocked thread. `SystemClock` runs callbacks on a
//! dedicated worker thread; `VirtualClock` lets tests and the scenario
//! harness drive time by hand and observe deterministic ordering.

use chrono::{DateTime, Utc};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A scheduled callback. Runs at most once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellable handle for a scheduled task.
///
/// Cancellation is advisory but checked immediately before the task runs, so
/// a task cancelled while the clock holds it will never fire. `cancel` is
/// idempotent.
#[derive(Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Monotonic time source plus delayed-callback scheduler.
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock started.
    fn now(&self) -> Duration;

    /// Wall-clock time, for audit timestamps only. Never used for scheduling.
    fn wall_now(&self) -> DateTime<Utc>;

    /// Schedule `task` to run after `delay`. Equal deadlines run in
    /// scheduling order.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

struct Entry {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

// Min-heap on (due, seq) via reversed Ord.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Queue {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

impl Queue {
    fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            next_seq: 0,
            shutdown: false,
        }
    }

    fn push(&mut self, due: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            due,
            seq,
            cancelled: Arc::clone(&handle.cancelled),
            task,
        });
        handle
    }
}

/// Real-time clock backed by a worker thread.
pub struct SystemClock {
    started: Instant,
    shared: Arc<(Mutex<Queue>, Condvar)>,
}

impl SystemClock {
    pub fn new() -> Self {
        let shared = Arc::new((Mutex::new(Queue::new()), Condvar::new()));
        let started = Instant::now();
        let worker_shared = Arc::clone(&shared);
        thread::spawn(move || Self::worker(started, worker_shared));
        Self { started, shared }
    }

    fn worker(started: Instant, shared: Arc<(Mutex<Queue>, Condvar)>) {
        let (lock, cvar) = &*shared;
        let mut queue = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if queue.shutdown {
                return;
            }
            let now = started.elapsed();
            match queue.entries.peek() {
                Some(entry) if entry.due <= now => {
                    let entry = queue.entries.pop().expect("peeked entry");
                    if entry.cancelled.load(Ordering::SeqCst) {
                        continue;
                    }
                    // Run the task without holding the queue lock so it can
                    // schedule follow-ups.
                    drop(queue);
                    (entry.task)();
                    queue = match lock.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                Some(entry) => {
                    let wait = entry.due - now;
                    queue = match cvar.wait_timeout(queue, wait) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
                None => {
                    queue = match cvar.wait(queue) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.shared;
        if let Ok(mut queue) = lock.lock() {
            queue.shutdown = true;
        }
        cvar.notify_all();
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let (lock, cvar) = &*self.shared;
        let handle = {
            let mut queue = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.push(self.started.elapsed() + delay, task)
        };
        cvar.notify_all();
        handle
    }
}

/// Manual-time clock for deterministic tests and scripted scenarios.
///
/// Nothing runs until `advance_by`/`advance_to` is called; tasks due within
/// the advanced range run inline, in deadline order, with time set to each
/// task's own deadline while it runs.
pub struct VirtualClock {
    epoch: DateTime<Utc>,
    state: Mutex<VirtualState>,
}

struct VirtualState {
    now: Duration,
    queue: Queue,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::with_epoch(Utc::now())
    }

    /// Fix the wall-clock epoch so audit timestamps are reproducible.
    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            state: Mutex::new(VirtualState {
                now: Duration::ZERO,
                queue: Queue::new(),
            }),
        }
    }

    pub fn advance_by(&self, delta: Duration) {
        let target = self.lock_state().now + delta;
        self.advance_to(target);
    }

    pub fn advance_to(&self, target: Duration) {
        loop {
            let task = {
                let mut state = self.lock_state();
                if target < state.now {
                    return;
                }
                match state.queue.entries.peek() {
                    Some(entry) if entry.due <= target => {
                        let entry = state.queue.entries.pop().expect("peeked entry");
                        state.now = state.now.max(entry.due);
                        if entry.cancelled.load(Ordering::SeqCst) {
                            None
                        } else {
                            Some(entry.task)
                        }
                    }
                    _ => {
                        state.now = target;
                        return;
                    }
                }
            };
            if let Some(task) = task {
                task();
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, VirtualState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.lock_state().now
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let now = self.lock_state().now;
        self.epoch + chrono::Duration::milliseconds(now.as_millis() as i64)
    }

    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let mut state = self.lock_state();
        let due = state.now + delay;
        state.queue.push(due, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counter_task(counter: &Arc<AtomicU32>) -> Task {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn virtual_clock_runs_tasks_in_deadline_order() {
        let clock = VirtualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, delay_ms) in [("b", 200u64), ("a", 100), ("c", 300)] {
            let order = Arc::clone(&order);
            clock.schedule(
                Duration::from_millis(delay_ms),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        clock.advance_by(Duration::from_millis(250));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);

        clock.advance_by(Duration::from_millis(100));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn virtual_clock_equal_deadlines_run_in_scheduling_order() {
        let clock = VirtualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            clock.schedule(
                Duration::from_millis(50),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        clock.advance_by(Duration::from_millis(50));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn cancelled_task_never_fires() {
        let clock = VirtualClock::new();
        let fired = Arc::new(AtomicU32::new(0));

        let handle = clock.schedule(Duration::from_millis(10), counter_task(&fired));
        handle.cancel();
        handle.cancel(); // idempotent

        clock.advance_by(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tasks_scheduled_during_a_task_run_within_the_same_advance() {
        let clock = Arc::new(VirtualClock::new());
        let fired = Arc::new(AtomicU32::new(0));

        let inner_clock = Arc::clone(&clock);
        let inner_fired = Arc::clone(&fired);
        clock.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                inner_clock.schedule(Duration::from_millis(10), counter_task(&inner_fired));
            }),
        );

        clock.advance_by(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn virtual_time_tracks_running_task_deadline() {
        let clock = Arc::new(VirtualClock::new());
        let observed = Arc::new(Mutex::new(Vec::new()));

        for delay_ms in [100u64, 250] {
            let clock_ref = Arc::clone(&clock);
            let observed = Arc::clone(&observed);
            clock.schedule(
                Duration::from_millis(delay_ms),
                Box::new(move || observed.lock().unwrap().push(clock_ref.now())),
            );
        }

        clock.advance_by(Duration::from_millis(300));
        assert_eq!(
            *observed.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(250)]
        );
        assert_eq!(clock.now(), Duration::from_millis(300));
    }

    #[test]
    fn virtual_wall_clock_follows_monotonic_offset() {
        let epoch = "2026-08-30T12:00:00Z"
            .parse::<DateTime<Utc>>()
            .expect("epoch");
        let clock = VirtualClock::with_epoch(epoch);
        clock.advance_by(Duration::from_millis(2500));
        assert_eq!(
            clock.wall_now().to_rfc3339(),
            "2026-08-30T12:00:02.500+00:00"
        );
    }

    #[test]
    fn system_clock_fires_scheduled_task() {
        let clock = SystemClock::new();
        let fired = Arc::new(AtomicU32::new(0));
        clock.schedule(Duration::from_millis(5), counter_task(&fired));

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn system_clock_respects_cancellation() {
        let clock = SystemClock::new();
        let fired = Arc::new(AtomicU32::new(0));
        let handle = clock.schedule(Duration::from_millis(50), counter_task(&fired));
        handle.cancel();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
