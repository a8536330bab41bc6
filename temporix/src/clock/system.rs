//! Live driver based on the system's monotonic clock.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use parking::{Parker, Unparker};
use tai_time::MonotonicClock;

use crate::clock::{saturating_interval, Clock, MonotonicTime, Ticker, TickerFn, Timer, TimerFn};
use crate::task::{SharedTickerFn, SharedTimerFn, Task, TaskBinding, TaskQueue};

/// A live [`Clock`] driven by the system's monotonic clock.
///
/// Each instance owns a dedicated worker thread that sleeps until the
/// earliest pending deadline and then runs the callback. Having a single
/// worker is what guarantees the serial-execution contract of the [`Clock`]
/// trait: two callbacks of the same `SystemClock` never run concurrently,
/// which keeps live behavior comparable to the single-threaded
/// [`Simulator`](crate::simulator::Simulator).
///
/// Dropping the clock stops the worker thread and discards all pending
/// callbacks.
#[derive(Debug)]
pub struct SystemClock {
    core: Arc<DriverCore>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SystemClock {
    /// Constructs a `SystemClock` whose time reads
    /// [`MonotonicTime::EPOCH`] at the moment of construction.
    pub fn new() -> Self {
        Self::from_instant(MonotonicTime::EPOCH, Instant::now())
    }

    /// Constructs a `SystemClock` with an offset between driver time and
    /// wall clock specified by a timestamp matched to an [`Instant`].
    ///
    /// The provided reference time may lie in the past or in the future.
    pub fn from_instant(reference: MonotonicTime, wall_clock_ref: Instant) -> Self {
        Self::start(MonotonicClock::init_from_instant(reference, wall_clock_ref))
    }

    /// Constructs a `SystemClock` with an offset between driver time and
    /// wall clock specified by a timestamp matched to a [`SystemTime`].
    ///
    /// The provided reference time may lie in the past or in the future.
    /// Even though the reference is specified with the (non-monotonic)
    /// system clock, time readings use the system's *monotonic* clock:
    /// the two are matched once, at construction time.
    pub fn from_system_time(reference: MonotonicTime, wall_clock_ref: SystemTime) -> Self {
        Self::start(MonotonicClock::init_from_system_time(
            reference,
            wall_clock_ref,
        ))
    }

    fn start(clock: MonotonicClock) -> Self {
        let (parker, unparker) = parking::pair();
        let core = Arc::new(DriverCore {
            clock,
            sched: Mutex::new(DriverSched {
                queue: TaskQueue::new(),
                shutdown: false,
            }),
            unparker,
        });

        let worker_core = Arc::clone(&core);
        let worker = thread::Builder::new()
            .name("temporix-clock".into())
            .spawn(move || run_worker(worker_core, parker))
            .expect("could not spawn the clock worker thread");

        Self {
            core,
            worker: Some(worker),
        }
    }

    /// Enqueues an unstoppable one-shot task due immediately.
    fn enqueue_immediate(&self, action: SharedTimerFn) {
        let mut sched = self.core.sched.lock().unwrap();
        if !sched.shutdown {
            let now = self.core.clock.now();
            sched
                .queue
                .push(now, Task::one_shot(TaskBinding::new(), action));
        }
        drop(sched);
        self.core.unparker.unpark();
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        self.core.sched.lock().unwrap().shutdown = true;
        self.core.unparker.unpark();
        if let Some(worker) = self.worker.take() {
            // The clock may be dropped from within one of its own callbacks;
            // the worker then winds down on its own and cannot be joined.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> MonotonicTime {
        self.core.clock.now()
    }

    fn since(&self, earlier: MonotonicTime) -> Duration {
        saturating_interval(earlier, self.now())
    }

    fn until(&self, later: MonotonicTime) -> Duration {
        saturating_interval(self.now(), later)
    }

    fn schedule_after(&self, delay: Duration, action: TimerFn) -> Box<dyn Timer> {
        let action = Arc::new(Mutex::new(action));

        // A zero delay is already expired: the callback runs promptly and
        // the handle degenerates to a timer that can only be re-armed.
        if delay.is_zero() {
            self.enqueue_immediate(Arc::clone(&action));

            return Box::new(ExpiredTimer {
                core: Arc::clone(&self.core),
                action,
            });
        }

        let binding = TaskBinding::new();
        let mut sched = self.core.sched.lock().unwrap();
        if !sched.shutdown {
            let deadline = self.core.clock.now() + delay;
            sched_trace!(?deadline, "one-shot callback scheduled on the live clock");
            sched.queue.push(
                deadline,
                Task::one_shot(Arc::clone(&binding), Arc::clone(&action)),
            );
        }
        drop(sched);
        self.core.unparker.unpark();

        Box::new(RealTimer {
            core: Arc::clone(&self.core),
            binding,
            action,
        })
    }

    fn schedule_at(&self, deadline: MonotonicTime, action: TimerFn) -> Box<dyn Timer> {
        self.schedule_after(self.until(deadline), action)
    }

    fn schedule_every(&self, period: Duration, action: TickerFn) -> Box<dyn Ticker> {
        assert!(!period.is_zero(), "the ticker period must be non-zero");

        let action = Arc::new(Mutex::new(action));
        let binding = TaskBinding::new();
        let mut sched = self.core.sched.lock().unwrap();
        if !sched.shutdown {
            let deadline = self.core.clock.now() + period;
            sched_trace!(?deadline, ?period, "periodic callback scheduled on the live clock");
            sched.queue.push(
                deadline,
                Task::periodic(Arc::clone(&binding), period, Arc::clone(&action)),
            );
        }
        drop(sched);
        self.core.unparker.unpark();

        Box::new(RealTicker {
            core: Arc::clone(&self.core),
            binding,
            period,
            action,
        })
    }
}

struct DriverCore {
    clock: MonotonicClock,
    sched: Mutex<DriverSched>,
    unparker: Unparker,
}

impl std::fmt::Debug for DriverCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCore").finish_non_exhaustive()
    }
}

struct DriverSched {
    queue: TaskQueue,
    shutdown: bool,
}

/// Worker loop: sleep until the earliest deadline, run the callback, repeat.
fn run_worker(core: Arc<DriverCore>, parker: Parker) {
    // Remaining wait below which the worker trades parking for spinning, to
    // compensate for the wake-up latency of the OS scheduler.
    const SPIN_THRESHOLD: Duration = Duration::from_micros(500);

    loop {
        let mut sched = core.sched.lock().unwrap();
        if sched.shutdown {
            return;
        }

        let now = core.clock.now();
        if let Some((scheduled, task)) = sched.queue.pop_expired(now) {
            // Run the callback with the scheduler lock released so that it
            // can re-enter the clock; serialization is provided by this
            // thread being the only executor.
            drop(sched);

            let fired_at = core.clock.now();
            sched_trace!(deadline = ?scheduled, now = ?fired_at, "live callback fired");
            if let Some((next_deadline, follow_up)) = task.run(scheduled, fired_at) {
                let mut sched = core.sched.lock().unwrap();
                if !sched.shutdown {
                    sched.queue.push(next_deadline, follow_up);
                }
            }

            continue;
        }

        match sched.queue.peek_deadline() {
            // `pop_expired` returned `None`, so the deadline is in the
            // future.
            Some(deadline) => {
                let wait = deadline.duration_since(now);
                drop(sched);

                if wait > SPIN_THRESHOLD {
                    parker.park_timeout(wait - SPIN_THRESHOLD);
                } else {
                    spin_sleep::sleep(wait);
                }
            }
            None => {
                drop(sched);
                parker.park();
            }
        }
    }
}

/// Live one-shot handle.
struct RealTimer {
    core: Arc<DriverCore>,
    binding: Arc<TaskBinding>,
    action: SharedTimerFn,
}

impl Timer for RealTimer {
    fn stop(&self) -> bool {
        let mut sched = self.core.sched.lock().unwrap();

        sched.queue.remove(&self.binding)
    }

    fn reset(&self, delay: Duration) -> bool {
        let mut sched = self.core.sched.lock().unwrap();
        let was_pending = sched.queue.remove(&self.binding);
        if sched.shutdown {
            return was_pending;
        }

        let deadline = self.core.clock.now() + delay;
        sched.queue.push(
            deadline,
            Task::one_shot(Arc::clone(&self.binding), Arc::clone(&self.action)),
        );
        drop(sched);
        self.core.unparker.unpark();

        was_pending
    }
}

/// Live periodic handle.
struct RealTicker {
    core: Arc<DriverCore>,
    binding: Arc<TaskBinding>,
    period: Duration,
    action: SharedTickerFn,
}

impl Ticker for RealTicker {
    fn stop(&self) -> bool {
        let mut sched = self.core.sched.lock().unwrap();

        sched.queue.remove(&self.binding)
    }

    fn reset(&self, delay: Duration) -> bool {
        let mut sched = self.core.sched.lock().unwrap();
        let was_pending = sched.queue.remove(&self.binding);
        if sched.shutdown {
            return was_pending;
        }

        // Only the next firing moves; the original period still applies
        // afterwards.
        let deadline = self.core.clock.now() + delay;
        sched.queue.push(
            deadline,
            Task::periodic(
                Arc::clone(&self.binding),
                self.period,
                Arc::clone(&self.action),
            ),
        );
        drop(sched);
        self.core.unparker.unpark();

        was_pending
    }
}

/// Degenerate handle returned for zero-delay one-shots: the callback already
/// ran (or is about to), so the handle supports re-arming but not stopping.
struct ExpiredTimer {
    core: Arc<DriverCore>,
    action: SharedTimerFn,
}

impl Timer for ExpiredTimer {
    /// Always returns `false`: there is nothing left to stop.
    fn stop(&self) -> bool {
        false
    }

    /// Re-arms the callback as a fresh one-shot that this handle cannot
    /// stop either.
    fn reset(&self, delay: Duration) -> bool {
        let mut sched = self.core.sched.lock().unwrap();
        if !sched.shutdown {
            let deadline = self.core.clock.now() + delay;
            sched.queue.push(
                deadline,
                Task::one_shot(TaskBinding::new(), Arc::clone(&self.action)),
            );
        }
        drop(sched);
        self.core.unparker.unpark();

        false
    }
}
