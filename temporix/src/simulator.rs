//! Virtual-time scheduling.
//!
//! This module provides the [`Simulator`], a [`Clock`] whose time never moves
//! on its own: it only advances when the caller consumes scheduled tasks or
//! sets the time explicitly. This makes time-driven logic deterministic and
//! as fast as the host machine, which is the foundation for replaying
//! synthetic history (see [`buffered`](crate::buffered)) and for testing
//! anything built against the [`Clock`] contract.
//!
//! # Examples
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use temporix::cancel::NoCancel;
//! use temporix::clock::{Clock, MonotonicTime};
//! use temporix::simulator::Simulator;
//!
//! let t0 = MonotonicTime::EPOCH;
//! let sim = Simulator::new(t0);
//!
//! let rang = Arc::new(AtomicBool::new(false));
//! let rang_writer = rang.clone();
//! sim.after_func(Duration::from_secs(60), move |_now| {
//!     rang_writer.store(true, Ordering::Relaxed);
//! });
//!
//! // Nothing happens until the simulation is advanced.
//! assert!(!rang.load(Ordering::Relaxed));
//!
//! let processed = sim.process_all(&NoCancel::new()).unwrap();
//! assert_eq!(processed, 1);
//! assert!(rang.load(Ordering::Relaxed));
//! assert_eq!(sim.now(), t0 + Duration::from_secs(60));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::{CancelSignal, Cancelled};
use crate::clock::{
    saturating_interval, Clock, MonotonicTime, Ticker, TickerFn, Timer, TimerFn,
};
use crate::lock::{BlockingLock, RawUsageLock, UsageLock};
use crate::task::{SharedTickerFn, SharedTimerFn, Task, TaskBinding, TaskQueue};

/// Outcome of a time-advancing operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Leap {
    /// Simulated time after the operation.
    pub now: MonotonicTime,
    /// How far simulated time actually moved; zero if the target did not lie
    /// in the future.
    pub elapsed: Duration,
}

/// A simulated-time [`Clock`].
///
/// A `Simulator` owns a deadline-ordered queue of pending tasks and a current
/// simulated time. Time is advanced explicitly and strictly forward, task by
/// task ([`advance`](Simulator::advance)), up to a bound
/// ([`process_all_until`](Simulator::process_all_until)) or until the queue
/// drains ([`process_all`](Simulator::process_all)); each consumed task moves
/// the time to its deadline before its action runs.
///
/// Task actions always execute with the scheduler lock released, so an action
/// may itself schedule, cancel or reset tasks and query the time without
/// deadlocking. The flip side is that a concurrent observer may see time
/// already advanced before the running action's side effects are visible.
///
/// Cloning is cheap and yields a handle to the same scheduler, which is how a
/// simulator is typically shared with the tasks it runs. Scheduling is
/// thread-safe; callers that guarantee single-threaded access can opt out of
/// blocking synchronization with
/// [`SingleThreadLock`](crate::lock::SingleThreadLock):
///
/// ```
/// use temporix::clock::MonotonicTime;
/// use temporix::lock::SingleThreadLock;
/// use temporix::simulator::Simulator;
///
/// let sim = Simulator::<SingleThreadLock>::with_raw_lock(MonotonicTime::EPOCH);
/// ```
pub struct Simulator<R: RawUsageLock = BlockingLock> {
    core: Arc<SimulatorCore<R>>,
}

struct SimulatorCore<R: RawUsageLock> {
    state: UsageLock<SimState, R>,
}

struct SimState {
    now: MonotonicTime,
    queue: TaskQueue,
}

impl SimState {
    /// Moves the clock to `target` unless it lies in the past.
    fn advance_clock(&mut self, target: MonotonicTime) -> Leap {
        if target > self.now {
            let elapsed = target.duration_since(self.now);
            self.now = target;

            return Leap {
                now: target,
                elapsed,
            };
        }

        Leap {
            now: self.now,
            elapsed: Duration::ZERO,
        }
    }
}

impl Simulator {
    /// Creates a simulator starting at the provided time, using the default
    /// blocking usage lock.
    pub fn new(start: MonotonicTime) -> Self {
        Self::with_raw_lock(start)
    }
}

impl<R: RawUsageLock> Simulator<R> {
    /// Creates a simulator starting at the provided time, synchronized by
    /// the raw usage lock `R`.
    pub fn with_raw_lock(start: MonotonicTime) -> Self {
        Self {
            core: Arc::new(SimulatorCore {
                state: UsageLock::new(SimState {
                    now: start,
                    queue: TaskQueue::new(),
                }),
            }),
        }
    }

    /// Returns the current simulated time.
    pub fn now(&self) -> MonotonicTime {
        self.core.state.read().now
    }

    /// Moves the simulated time to `max(now, t)`, without running any task.
    /// Time never regresses.
    pub fn set_now(&self, t: MonotonicTime) -> Leap {
        let mut state = self.core.state.write();

        state.advance_clock(t)
    }

    /// Moves the simulated time to the next pending task's deadline without
    /// running the task, or returns `None` if no task is pending.
    pub fn approach(&self) -> Option<Leap> {
        let mut state = self.core.state.write();
        let deadline = state.queue.peek_deadline()?;

        Some(state.advance_clock(deadline))
    }

    /// Advances the simulated time to the next pending task's deadline and
    /// runs the task, or returns `None` if no task is pending.
    pub fn advance(&self) -> Option<Leap> {
        self.advance_if_before(None)
    }

    /// Advances the simulated time to the next pending task's deadline and
    /// runs the task, but only if that deadline is strictly before `bound`.
    ///
    /// Returns `None`, leaving the time unchanged, if no task is pending or
    /// the next deadline does not qualify. An unset bound always qualifies.
    pub fn advance_if_before(&self, bound: Option<MonotonicTime>) -> Option<Leap> {
        let mut state = self.core.state.write();
        let (scheduled, task) = state.queue.pop_expiring_before(bound)?;
        let leap = state.advance_clock(scheduled);

        // Release the scheduler lock before running the action, so that the
        // action can re-enter the scheduler; re-acquire it only to queue the
        // follow-up task.
        drop(state);

        sched_trace!(deadline = ?scheduled, now = ?leap.now, "simulated task fired");
        if let Some((deadline, follow_up)) = task.run(scheduled, leap.now) {
            self.core.state.write().queue.push(deadline, follow_up);
        }

        Some(leap)
    }

    /// Repeatedly advances until the queue is empty or the cancellation
    /// signal fires, returning the number of tasks executed.
    ///
    /// **Warning**: a task that re-arms itself indefinitely (a
    /// never-terminating ticker) makes this call loop forever; bound it
    /// with [`process_all_until`](Simulator::process_all_until) instead.
    pub fn process_all<S: CancelSignal>(&self, cancel: &S) -> Result<usize, Cancelled> {
        self.process_all_until(cancel, None)
    }

    /// Repeatedly advances through every task whose deadline is strictly
    /// before `until`, stopping early if the cancellation signal fires, and
    /// returns the number of tasks executed.
    ///
    /// An unset bound processes every task, as
    /// [`process_all`](Simulator::process_all) does.
    pub fn process_all_until<S: CancelSignal>(
        &self,
        cancel: &S,
        until: Option<MonotonicTime>,
    ) -> Result<usize, Cancelled> {
        let mut processed = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled { processed });
            }
            if self.advance_if_before(until).is_none() {
                return Ok(processed);
            }
            processed += 1;
        }
    }

    /// Whether a pending task has a deadline not after `before`.
    pub fn has_expired_tasks(&self, before: MonotonicTime) -> bool {
        self.core.state.read().queue.has_expired(before)
    }

    /// Atomically removes and returns every pending task, earliest deadline
    /// first, leaving the queue empty.
    ///
    /// The handles of the extracted tasks become inert: their `stop` and
    /// `reset` calls turn into no-ops.
    pub fn pop_all_tasks(&self) -> Vec<PendingTask> {
        let mut state = self.core.state.write();

        state
            .queue
            .drain()
            .into_iter()
            .map(|(deadline, task)| PendingTask { deadline, task })
            .collect()
    }

    fn schedule_one_shot(&self, deadline: Deadline, action: TimerFn) -> Box<dyn Timer>
    where
        R: 'static,
    {
        let action: SharedTimerFn = Arc::new(std::sync::Mutex::new(action));
        let binding = TaskBinding::new();

        let mut state = self.core.state.write();
        let deadline = deadline.resolve(state.now);
        sched_trace!(?deadline, "one-shot task scheduled on the simulator");
        state.queue.push(
            deadline,
            Task::one_shot(Arc::clone(&binding), Arc::clone(&action)),
        );
        drop(state);

        Box::new(SimTimer {
            core: Arc::clone(&self.core),
            binding,
            action,
        })
    }
}

impl<R: RawUsageLock> Clone for Simulator<R> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<R: RawUsageLock> fmt::Debug for Simulator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator").finish_non_exhaustive()
    }
}

/// A deadline specification for one-shot scheduling.
enum Deadline {
    In(Duration),
    At(MonotonicTime),
}

impl Deadline {
    fn resolve(self, now: MonotonicTime) -> MonotonicTime {
        match self {
            Self::In(delay) => now + delay,
            Self::At(deadline) => deadline,
        }
    }
}

impl<R: RawUsageLock + 'static> Clock for Simulator<R> {
    fn now(&self) -> MonotonicTime {
        Simulator::now(self)
    }

    fn since(&self, earlier: MonotonicTime) -> Duration {
        saturating_interval(earlier, self.now())
    }

    fn until(&self, later: MonotonicTime) -> Duration {
        saturating_interval(self.now(), later)
    }

    fn schedule_after(&self, delay: Duration, action: TimerFn) -> Box<dyn Timer> {
        self.schedule_one_shot(Deadline::In(delay), action)
    }

    /// Schedules a one-shot callback firing at the given time.
    ///
    /// A deadline in the past of the simulated time is allowed: the task
    /// fires on the next advance, observing the current (unmoved) time.
    fn schedule_at(&self, deadline: MonotonicTime, action: TimerFn) -> Box<dyn Timer> {
        self.schedule_one_shot(Deadline::At(deadline), action)
    }

    fn schedule_every(&self, period: Duration, action: TickerFn) -> Box<dyn Ticker> {
        assert!(!period.is_zero(), "the ticker period must be non-zero");

        let action: SharedTickerFn = Arc::new(std::sync::Mutex::new(action));
        let binding = TaskBinding::new();

        let mut state = self.core.state.write();
        let deadline = state.now + period;
        sched_trace!(?deadline, ?period, "periodic task scheduled on the simulator");
        state.queue.push(
            deadline,
            Task::periodic(Arc::clone(&binding), period, Arc::clone(&action)),
        );
        drop(state);

        Box::new(SimTicker {
            core: Arc::clone(&self.core),
            binding,
            period,
            action,
        })
    }
}

/// A pending task extracted from a simulator, together with its deadline.
///
/// Pending tasks are produced by
/// [`Simulator::pop_all_tasks()`](Simulator::pop_all_tasks) and consumed by
/// the buffering hand-off, which re-anchors them on a live clock.
pub struct PendingTask {
    deadline: MonotonicTime,
    task: Task,
}

impl PendingTask {
    /// The absolute time at which the task was due to fire.
    pub fn deadline(&self) -> MonotonicTime {
        self.deadline
    }

    /// Runs the task's action as of `now` and returns the follow-up task, if
    /// any.
    pub(crate) fn run(self, now: MonotonicTime) -> Option<PendingTask> {
        self.task
            .run(self.deadline, now)
            .map(|(deadline, task)| PendingTask { deadline, task })
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Simulated one-shot handle.
struct SimTimer<R: RawUsageLock> {
    core: Arc<SimulatorCore<R>>,
    binding: Arc<TaskBinding>,
    action: SharedTimerFn,
}

impl<R: RawUsageLock> Timer for SimTimer<R> {
    fn stop(&self) -> bool {
        let mut state = self.core.state.write();

        state.queue.remove(&self.binding)
    }

    fn reset(&self, delay: Duration) -> bool {
        let mut state = self.core.state.write();
        let was_pending = state.queue.remove(&self.binding);
        let deadline = state.now + delay;
        state.queue.push(
            deadline,
            Task::one_shot(Arc::clone(&self.binding), Arc::clone(&self.action)),
        );

        was_pending
    }
}

/// Simulated periodic handle.
struct SimTicker<R: RawUsageLock> {
    core: Arc<SimulatorCore<R>>,
    binding: Arc<TaskBinding>,
    period: Duration,
    action: SharedTickerFn,
}

impl<R: RawUsageLock> Ticker for SimTicker<R> {
    fn stop(&self) -> bool {
        let mut state = self.core.state.write();

        state.queue.remove(&self.binding)
    }

    fn reset(&self, delay: Duration) -> bool {
        let mut state = self.core.state.write();
        let was_pending = state.queue.remove(&self.binding);

        // Only the next firing moves; the original period still applies
        // afterwards.
        let deadline = state.now + delay;
        state.queue.push(
            deadline,
            Task::periodic(
                Arc::clone(&self.binding),
                self.period,
                Arc::clone(&self.action),
            ),
        );

        was_pending
    }
}
