//! The clock contract shared by simulated and live drivers.
//!
//! This module provides most notably:
//!
//! * [`Clock`]: the scheduling contract implemented by every time driver,
//!   namely the [`Simulator`](crate::simulator::Simulator), the live
//!   [`SystemClock`], and the
//!   [`BufferingClock`](crate::buffered::BufferingClock) decorator;
//! * [`Timer`] and [`Ticker`]: the handles through which a scheduled
//!   callback can be cancelled or re-armed;
//! * [`MonotonicTime`]: the timestamp format used for deadlines, re-exported
//!   from the [`tai_time`] crate.
//!
//! Because every driver implements the same contract, code written against
//! `Clock` can be exercised against simulated time in tests and against the
//! system clock in production without modification.
//!
//! # Examples
//!
//! A service that schedules a periodic job, written against an arbitrary
//! clock:
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use temporix::cancel::NoCancel;
//! use temporix::clock::{Clock, MonotonicTime};
//! use temporix::simulator::Simulator;
//!
//! fn start_heartbeat(clock: &impl Clock, beats: Arc<AtomicUsize>) {
//!     clock.every_func(Duration::from_secs(10), move |_now| {
//!         beats.fetch_add(1, Ordering::Relaxed) < 4
//!     });
//! }
//!
//! let sim = Simulator::new(MonotonicTime::EPOCH);
//! let beats = Arc::new(AtomicUsize::new(0));
//!
//! start_heartbeat(&sim, beats.clone());
//! sim.process_all(&NoCancel::new()).unwrap();
//!
//! // The predicate allowed 5 firings before reporting `false`.
//! assert_eq!(beats.load(Ordering::Relaxed), 5);
//! ```

mod system;

pub use tai_time::MonotonicTime;

pub use system::SystemClock;

use std::time::Duration;

/// A one-shot callback invoked with the time it fires at.
pub type TimerFn = Box<dyn FnMut(MonotonicTime) + Send>;

/// A periodic callback invoked with the time it fires at; its return value
/// decides whether the ticker re-arms.
pub type TickerFn = Box<dyn FnMut(MonotonicTime) -> bool + Send>;

/// A source of time that can schedule one-shot and periodic callbacks.
///
/// The contract is identical for all drivers:
///
/// * callbacks fire in non-decreasing deadline order and never concurrently
///   with one another (execution is serialized per driver instance);
/// * callbacks run without any driver lock held, so a callback may freely
///   call back into its own driver to schedule, cancel, reset or query
///   time;
/// * a periodic callback re-arms on a fixed grid anchored at its original
///   deadline for as long as it returns `true`.
///
/// What differs is what drives time forward: the wall clock for
/// [`SystemClock`], explicit advancement for
/// [`Simulator`](crate::simulator::Simulator).
///
/// There is no ambient default clock: a clock is constructed explicitly,
/// typically once at process start, and passed down to the code that needs
/// it.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> MonotonicTime;

    /// Returns how much time elapsed since `earlier`, saturating at zero if
    /// `earlier` is in the future.
    fn since(&self, earlier: MonotonicTime) -> Duration;

    /// Returns how much time remains until `later`, saturating at zero if
    /// `later` is in the past.
    fn until(&self, later: MonotonicTime) -> Duration;

    /// Schedules a one-shot callback firing once the given delay has
    /// elapsed.
    ///
    /// See [`after_func`](Clock::after_func) for a closure-friendly variant.
    fn schedule_after(&self, delay: Duration, action: TimerFn) -> Box<dyn Timer>;

    /// Schedules a one-shot callback firing at the given time.
    ///
    /// See [`until_func`](Clock::until_func) for a closure-friendly variant.
    fn schedule_at(&self, deadline: MonotonicTime, action: TimerFn) -> Box<dyn Timer>;

    /// Schedules a periodic callback firing every `period`, starting one
    /// period from now, for as long as the callback returns `true`.
    ///
    /// # Panics
    ///
    /// Panics if the period is zero.
    ///
    /// See [`every_func`](Clock::every_func) for a closure-friendly variant.
    fn schedule_every(&self, period: Duration, action: TickerFn) -> Box<dyn Ticker>;

    /// Schedules a one-shot closure firing once the given delay has elapsed.
    fn after_func<F>(&self, delay: Duration, f: F) -> Box<dyn Timer>
    where
        F: FnMut(MonotonicTime) + Send + 'static,
        Self: Sized,
    {
        self.schedule_after(delay, Box::new(f))
    }

    /// Schedules a one-shot closure firing at the given time.
    fn until_func<F>(&self, deadline: MonotonicTime, f: F) -> Box<dyn Timer>
    where
        F: FnMut(MonotonicTime) + Send + 'static,
        Self: Sized,
    {
        self.schedule_at(deadline, Box::new(f))
    }

    /// Schedules a periodic closure firing every `period` for as long as it
    /// returns `true`.
    ///
    /// # Panics
    ///
    /// Panics if the period is zero.
    fn every_func<F>(&self, period: Duration, f: F) -> Box<dyn Ticker>
    where
        F: FnMut(MonotonicTime) -> bool + Send + 'static,
        Self: Sized,
    {
        self.schedule_every(period, Box::new(f))
    }
}

/// Handle to a scheduled one-shot callback.
///
/// Handles are shareable: all methods take `&self`, so a handle can be moved
/// into an `Arc` and manipulated from several callbacks at once.
pub trait Timer: Send + Sync {
    /// Cancels the callback if it is still pending.
    ///
    /// Returns whether the callback was actually pending. Stopping an
    /// already-fired or already-stopped timer is a harmless no-op reported as
    /// `false`; it cannot affect an execution already in flight.
    fn stop(&self) -> bool;

    /// Re-arms the callback to fire once `delay` has elapsed from now,
    /// cancelling the currently pending firing, if any.
    ///
    /// The timer is always pending afterwards, whether or not it had already
    /// fired or been stopped; the return value reports the prior pending
    /// state.
    fn reset(&self, delay: Duration) -> bool;
}

/// Handle to a scheduled periodic callback.
///
/// Like [`Timer`] handles, ticker handles are shareable through `&self`.
pub trait Ticker: Send + Sync {
    /// Cancels the periodic callback if it is still pending.
    ///
    /// Returns whether a firing was actually pending.
    fn stop(&self) -> bool;

    /// Moves the next firing to `delay` from now, cancelling the currently
    /// pending firing, if any.
    ///
    /// Only the next firing moves: subsequent firings continue on the
    /// ticker's original period, anchored at the re-armed deadline. The
    /// return value reports the prior pending state.
    fn reset(&self, delay: Duration) -> bool;
}

/// Returns the duration from `earlier` to `later`, saturating at zero when
/// `later` does not lie in the future of `earlier`.
pub(crate) fn saturating_interval(earlier: MonotonicTime, later: MonotonicTime) -> Duration {
    if later > earlier {
        later.duration_since(earlier)
    } else {
        Duration::ZERO
    }
}
