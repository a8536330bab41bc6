//! A virtual-time scheduler with deterministic replay and live hand-off.
//!
//! Temporix lets time-driven code (anything built on timers and tickers)
//! run against either the real wall clock or a fully simulated clock that
//! advances only under program control, behind one and the same scheduling
//! contract. On top of that it provides a buffering decorator that replays a
//! backlog of simulated history and then hands still-pending work over to
//! live scheduling, with no gap, duplication or reordering.
//!
//! The crate revolves around three drivers of the common
//! [`Clock`](clock::Clock) contract:
//!
//! * [`Simulator`](simulator::Simulator): simulated time, advanced
//!   explicitly, task by task, up to a bound, or until the task queue
//!   drains. Deterministic and as fast as the host machine.
//! * [`SystemClock`](clock::SystemClock): live time, driven by the system's
//!   monotonic clock with a dedicated worker thread executing callbacks
//!   serially.
//! * [`BufferingClock`](buffered::BufferingClock): a decorator over any
//!   live clock that buffers scheduled tasks in a private simulator and
//!   hands them off to the live clock on demand.
//!
//! Scheduled callbacks are controlled through the
//! [`Timer`](clock::Timer)/[`Ticker`](clock::Ticker) handles, which support
//! cancellation and re-arming while a firing is still pending. Periodic
//! callbacks decide their own fate: they keep re-arming for as long as they
//! return `true`.
//!
//! # Examples
//!
//! Run a minute-long interaction between a one-shot and a periodic task in
//! simulated time, instantly:
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use temporix::cancel::NoCancel;
//! use temporix::clock::{Clock, MonotonicTime, Ticker};
//! use temporix::simulator::Simulator;
//!
//! let t0 = MonotonicTime::EPOCH;
//! let sim = Simulator::new(t0);
//!
//! let ticks = Arc::new(AtomicUsize::new(0));
//! let ticks_writer = ticks.clone();
//! let ticker = sim.every_func(Duration::from_secs(10), move |_now| {
//!     ticks_writer.fetch_add(1, Ordering::Relaxed);
//!     true
//! });
//!
//! // Shut the ticker down after one minute.
//! let ticker: Arc<dyn Ticker> = Arc::from(ticker);
//! let stopper = Arc::clone(&ticker);
//! sim.after_func(Duration::from_secs(61), move |_now| {
//!     stopper.stop();
//! });
//!
//! sim.process_all(&NoCancel::new()).unwrap();
//!
//! assert_eq!(ticks.load(Ordering::Relaxed), 6);
//! assert_eq!(sim.now(), t0 + Duration::from_secs(61));
//! ```
//!
//! The same callback-scheduling code runs unmodified against
//! [`SystemClock`](clock::SystemClock); only the construction of the clock
//! and the driving of time differ.
//!
//! # Features
//!
//! * `tracing`: emits trace-level `tracing` events from the scheduling hot
//!   paths.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

#[cfg(feature = "tracing")]
macro_rules! sched_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! sched_trace {
    ($($arg:tt)*) => {{}};
}

pub mod buffered;
pub mod cancel;
pub mod clock;
pub mod lock;
pub mod simulator;
pub(crate) mod task;
pub(crate) mod util;
