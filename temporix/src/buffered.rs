//! Buffered scheduling with live hand-off.
//!
//! [`BufferingClock`] decorates a live [`Clock`] so that, while buffering is
//! enabled, all scheduling calls are redirected into a private
//! [`Simulator`] seeded at a historical start time. Ending the buffering
//! replays the accumulated backlog up to the present and transparently hands
//! the still-pending tasks over to the live clock, with no duplication, loss
//! or reordering.
//!
//! This is useful to pre-warm systems whose logic depends on scheduled
//! callbacks. For instance, a trading strategy may consume indicators that
//! are themselves computed by periodic jobs: replaying a few hours of
//! historical market events through the buffering clock makes the indicators
//! "live through" their past and reach the present fully warmed up, at which
//! point scheduling switches over to real time.
//!
//! # Examples
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use temporix::buffered::BufferingClock;
//! use temporix::cancel::NoCancel;
//! use temporix::clock::{Clock, MonotonicTime};
//! use temporix::simulator::Simulator;
//!
//! // Any `Clock` can play the live role; a simulator keeps this example
//! // deterministic.
//! let live = Simulator::new(MonotonicTime::EPOCH + Duration::from_secs(3600));
//! let clock = BufferingClock::new(live.clone());
//!
//! // Buffer one hour of history.
//! clock.begin_buffering(MonotonicTime::EPOCH);
//! let fired = Arc::new(AtomicUsize::new(0));
//! let fired_writer = fired.clone();
//! clock.after_func(Duration::from_secs(600), move |_now| {
//!     fired_writer.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! // The hand-off replays the backlog: the task deadline lies in the past
//! // of the live time, so it fires during the hand-off itself.
//! clock.end_buffering(&NoCancel::new(), || live.now()).unwrap();
//! assert_eq!(fired.load(Ordering::Relaxed), 1);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cancel::{CancelSignal, Cancelled};
use crate::clock::{Clock, MonotonicTime, Ticker, TickerFn, Timer, TimerFn};
use crate::simulator::{PendingTask, Simulator};

/// A decorator over a live [`Clock`] that can buffer scheduled tasks in
/// simulated time and later hand them off to the live clock.
///
/// Buffering is all-or-nothing: while enabled, every scheduling call is
/// routed to the private simulator; while disabled, every call goes straight
/// to the live clock. Time queries (`now`, `since`, `until`) always answer
/// from the live clock; buffered actions must use the time they are invoked
/// with instead.
///
/// Beginning the buffering twice, or ending it while not buffering, is a
/// programming error and panics.
///
/// Note that `stop` and `reset` on handles obtained while buffering become
/// no-ops once the buffering has ended: the hand-off re-anchors the
/// underlying tasks on the live clock and the old handles are left behind.
pub struct BufferingClock<C> {
    live: Arc<C>,
    buffer: Mutex<Option<Simulator>>,
}

impl<C: Clock + Send + Sync + 'static> BufferingClock<C> {
    /// Creates a decorator over the provided live clock, with buffering
    /// initially disabled.
    pub fn new(live: C) -> Self {
        Self {
            live: Arc::new(live),
            buffer: Mutex::new(None),
        }
    }

    /// Enables buffering: a private simulator is created at the provided
    /// historical start time and all scheduling calls are redirected to it.
    ///
    /// # Panics
    ///
    /// Panics if buffering is already enabled.
    pub fn begin_buffering(&self, start: MonotonicTime) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_some() {
            panic!("task buffering is already enabled");
        }

        sched_trace!(?start, "task buffering enabled");
        *buffer = Some(Simulator::new(start));
    }

    /// Disables buffering: replays the buffered backlog up to the live time
    /// and hands the remaining future-dated tasks over to the live clock,
    /// anchored at their original deadlines.
    ///
    /// `live_now` is queried afresh on every iteration because the live time
    /// keeps moving while the backlog is replayed; it would typically be
    /// `|| clock.now()` on the wrapped clock. The replay loops until no
    /// buffered task is due anymore relative to the then-current live time;
    /// a single pass is not enough, since replayed tasks may schedule
    /// further tasks that are themselves already due.
    ///
    /// Returns the number of buffered tasks replayed during the hand-off.
    /// On cancellation the buffering is left enabled, with the cancellation
    /// error reporting how many tasks were replayed; the hand-off can be
    /// retried.
    ///
    /// # Panics
    ///
    /// Panics if buffering is not enabled.
    pub fn end_buffering<S, F>(&self, cancel: &S, live_now: F) -> Result<usize, Cancelled>
    where
        S: CancelSignal,
        F: Fn() -> MonotonicTime,
    {
        let sim = {
            let buffer = self.buffer.lock().unwrap();
            buffer
                .as_ref()
                .expect("task buffering is not enabled")
                .clone()
        };

        let mut processed = 0;
        let live_tasks = loop {
            // Replay everything due before the live time sampled now; the
            // simulator lock is not held while replayed actions run, so they
            // can re-enter this clock.
            match sim.process_all_until(cancel, Some(live_now())) {
                Ok(n) => processed += n,
                Err(Cancelled { processed: n }) => {
                    return Err(Cancelled {
                        processed: processed + n,
                    })
                }
            }

            let mut buffer = self.buffer.lock().unwrap();
            if buffer.is_none() {
                panic!("task buffering is not enabled");
            }

            // The live time has moved while draining, and replayed tasks may
            // have scheduled new, already-due tasks: loop until the backlog
            // is stable relative to a fresh live time.
            if sim.has_expired_tasks(live_now()) {
                continue;
            }

            // Atomically flip to live scheduling and extract the remaining
            // future-dated tasks.
            let remaining = sim.pop_all_tasks();
            *buffer = None;

            break remaining;
        };

        sched_trace!(replayed = processed, transferred = live_tasks.len(), "task buffering ended");
        for task in live_tasks {
            self.run_in_live(task);
        }

        Ok(processed)
    }

    /// Schedules an extracted task on the live clock at its original
    /// absolute deadline; follow-up tasks are re-anchored live as well.
    fn run_in_live(&self, task: PendingTask) {
        Self::schedule_in_live(&self.live, task);
    }

    fn schedule_in_live(live: &Arc<C>, task: PendingTask) {
        let delay = live.until(task.deadline());
        let live_again = Arc::clone(live);
        let mut slot = Some(task);

        live.schedule_after(
            delay,
            Box::new(move |now| {
                if let Some(task) = slot.take() {
                    if let Some(follow_up) = task.run(now) {
                        Self::schedule_in_live(&live_again, follow_up);
                    }
                }
            }),
        );
    }
}

impl<C: Clock + Send + Sync + 'static> Clock for BufferingClock<C> {
    /// Returns the live clock's time, whether or not buffering is enabled.
    fn now(&self) -> MonotonicTime {
        self.live.now()
    }

    fn since(&self, earlier: MonotonicTime) -> Duration {
        self.live.since(earlier)
    }

    fn until(&self, later: MonotonicTime) -> Duration {
        self.live.until(later)
    }

    fn schedule_after(&self, delay: Duration, action: TimerFn) -> Box<dyn Timer> {
        let buffer = self.buffer.lock().unwrap();
        match &*buffer {
            Some(sim) => sim.schedule_after(delay, action),
            None => self.live.schedule_after(delay, action),
        }
    }

    fn schedule_at(&self, deadline: MonotonicTime, action: TimerFn) -> Box<dyn Timer> {
        let buffer = self.buffer.lock().unwrap();
        match &*buffer {
            Some(sim) => sim.schedule_at(deadline, action),
            None => self.live.schedule_at(deadline, action),
        }
    }

    fn schedule_every(&self, period: Duration, action: TickerFn) -> Box<dyn Ticker> {
        let buffer = self.buffer.lock().unwrap();
        match &*buffer {
            Some(sim) => sim.schedule_every(period, action),
            None => self.live.schedule_every(period, action),
        }
    }
}

impl<C> fmt::Debug for BufferingClock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferingClock").finish_non_exhaustive()
    }
}
