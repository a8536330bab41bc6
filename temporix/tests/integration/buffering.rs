//! Buffering and hand-off semantics.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use temporix::buffered::BufferingClock;
use temporix::cancel::{CancelFlag, Cancelled, NoCancel};
use temporix::clock::{Clock, MonotonicTime, SystemClock};
use temporix::simulator::Simulator;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(3600 * h)
}

type Log = Arc<Mutex<Vec<u32>>>;

fn entries(log: &Log) -> Vec<u32> {
    log.lock().unwrap().clone()
}

fn push(log: &Log, entry: u32) -> impl FnMut(MonotonicTime) + Send + 'static {
    let log = Arc::clone(log);
    move |_| log.lock().unwrap().push(entry)
}

/// Past-dated tasks fire in order during the hand-off; a future-dated task
/// fires exactly once, via the live clock, at its original deadline.
#[test]
fn handoff_replays_history_then_goes_live() {
    let t0 = MonotonicTime::EPOCH;
    let live = Simulator::new(t0 + hours(4));
    let clock = BufferingClock::new(live.clone());
    let log: Log = Arc::default();

    clock.begin_buffering(t0);
    clock.after_func(hours(2), push(&log, 2));
    clock.after_func(hours(1), push(&log, 1));
    clock.after_func(hours(3), push(&log, 3));
    clock.after_func(hours(4) + secs(1), push(&log, 4));

    // Nothing fires while buffering.
    assert_eq!(entries(&log), Vec::<u32>::new());

    let replayed = clock.end_buffering(&NoCancel::new(), || live.now()).unwrap();
    assert_eq!(replayed, 3);
    assert_eq!(entries(&log), vec![1, 2, 3]);

    // The future-dated task was re-anchored on the live clock at its
    // original absolute deadline, and fires exactly once.
    assert_eq!(live.process_all(&NoCancel::new()), Ok(1));
    assert_eq!(entries(&log), vec![1, 2, 3, 4]);
    assert_eq!(live.now(), t0 + hours(4) + secs(1));
    assert_eq!(live.process_all(&NoCancel::new()), Ok(0));
}

/// Replayed tasks may schedule further tasks, including periodic ones; the
/// hand-off replays whatever is due and transfers the rest.
#[test]
fn handoff_replays_nested_and_periodic_tasks() {
    let t0 = MonotonicTime::EPOCH;
    let live = Simulator::new(t0 + hours(4));
    let clock = Arc::new(BufferingClock::new(live.clone()));
    let log: Log = Arc::default();
    let tick_log: Log = Arc::default();

    clock.begin_buffering(t0);
    clock.after_func(hours(2), push(&log, 3));
    {
        let log = Arc::clone(&log);
        let chained_clock = Arc::clone(&clock);
        clock.after_func(Duration::ZERO, move |_| {
            log.lock().unwrap().push(1);

            // Scheduled from a replayed task, still in the past: replayed
            // too.
            let log = Arc::clone(&log);
            chained_clock.after_func(hours(3), move |_| log.lock().unwrap().push(4));
        });
    }
    clock.after_func(hours(1), push(&log, 2));
    clock.after_func(hours(4) + secs(3), push(&log, 5));
    {
        let tick_log = Arc::clone(&tick_log);
        let chained_clock = Arc::clone(&clock);
        clock.after_func(secs(1), move |_| {
            let tick_log = Arc::clone(&tick_log);
            chained_clock.every_func(hours(1), move |_| {
                let mut tick_log = tick_log.lock().unwrap();
                tick_log.push(1);
                tick_log.len() < 4
            });
        });
    }

    let replayed = clock.end_buffering(&NoCancel::new(), || live.now()).unwrap();

    // 1, 2, 3, 4, the ticker-installing task and three buffered ticks.
    assert_eq!(replayed, 8);
    assert_eq!(entries(&log), vec![1, 2, 3, 4]);
    assert_eq!(entries(&tick_log), vec![1, 1, 1]);

    // Still pending at hand-off: the 4th tick (due at 4h 1s) and task 5 (due
    // at 4h 3s), both re-anchored live.
    assert_eq!(live.process_all(&NoCancel::new()), Ok(2));
    assert_eq!(entries(&log), vec![1, 2, 3, 4, 5]);
    assert_eq!(entries(&tick_log), vec![1, 1, 1, 1]);
    assert_eq!(live.process_all(&NoCancel::new()), Ok(0));
}

/// A periodic task transferred to the live clock keeps re-arming there, on
/// its original firing grid.
#[test]
fn migrated_ticker_keeps_firing_live() {
    let t0 = MonotonicTime::EPOCH;
    let live = Simulator::new(t0 + hours(1));
    let clock = BufferingClock::new(live.clone());
    let firings = Arc::new(Mutex::new(Vec::new()));

    clock.begin_buffering(t0);
    {
        let firings = Arc::clone(&firings);
        clock.every_func(Duration::from_secs(45 * 60), move |now| {
            let mut firings = firings.lock().unwrap();
            firings.push(now);
            firings.len() < 3
        });
    }

    assert_eq!(clock.end_buffering(&NoCancel::new(), || live.now()), Ok(1));

    assert_eq!(live.process_all(&NoCancel::new()), Ok(2));
    assert_eq!(
        *firings.lock().unwrap(),
        vec![
            t0 + Duration::from_secs(45 * 60),
            t0 + Duration::from_secs(90 * 60),
            t0 + Duration::from_secs(135 * 60),
        ]
    );
}

/// After the hand-off, scheduling calls go straight to the live clock.
#[test]
fn scheduling_after_handoff_is_live() {
    let t0 = MonotonicTime::EPOCH;
    let live = Simulator::new(t0 + hours(1));
    let clock = BufferingClock::new(live.clone());
    let log: Log = Arc::default();

    clock.begin_buffering(t0);
    clock.end_buffering(&NoCancel::new(), || live.now()).unwrap();

    clock.after_func(secs(10), push(&log, 1));
    assert_eq!(live.process_all(&NoCancel::new()), Ok(1));
    assert_eq!(entries(&log), vec![1]);
}

/// A cancelled hand-off reports partial progress and leaves the buffering
/// enabled so it can be retried.
#[test]
fn cancelled_handoff_can_be_retried() {
    let t0 = MonotonicTime::EPOCH;
    let live = Simulator::new(t0 + hours(2));
    let clock = BufferingClock::new(live.clone());
    let log: Log = Arc::default();
    let flag = CancelFlag::new();

    clock.begin_buffering(t0);
    {
        let log = Arc::clone(&log);
        let flag = flag.clone();
        clock.after_func(secs(600), move |_| {
            log.lock().unwrap().push(1);
            flag.cancel();
        });
    }
    clock.after_func(secs(1200), push(&log, 2));

    assert_eq!(
        clock.end_buffering(&flag, || live.now()),
        Err(Cancelled { processed: 1 })
    );
    assert_eq!(entries(&log), vec![1]);

    // Buffering is still enabled; the hand-off completes on retry.
    assert_eq!(clock.end_buffering(&NoCancel::new(), || live.now()), Ok(1));
    assert_eq!(entries(&log), vec![1, 2]);
}

#[test]
#[should_panic(expected = "task buffering is already enabled")]
fn beginning_buffering_twice_panics() {
    let clock = BufferingClock::new(Simulator::new(MonotonicTime::EPOCH));

    clock.begin_buffering(MonotonicTime::EPOCH);
    clock.begin_buffering(MonotonicTime::EPOCH);
}

#[test]
#[should_panic(expected = "task buffering is not enabled")]
fn ending_buffering_when_disabled_panics() {
    let live = Simulator::new(MonotonicTime::EPOCH);
    let clock = BufferingClock::new(live.clone());

    let _ = clock.end_buffering(&NoCancel::new(), || live.now());
}

/// End-to-end hand-off against the live system clock, scaled down from
/// hours to milliseconds.
#[test]
fn handoff_to_system_clock() {
    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    let clock = Arc::new(BufferingClock::new(SystemClock::new()));
    let log: Log = Arc::default();
    let tick_log: Log = Arc::default();

    clock.begin_buffering(clock.now() - secs(4));

    clock.after_func(millis(2000), push(&log, 3));
    {
        let log = Arc::clone(&log);
        let chained_clock = Arc::clone(&clock);
        clock.after_func(Duration::ZERO, move |_| {
            log.lock().unwrap().push(1);

            let log = Arc::clone(&log);
            chained_clock.after_func(millis(3000), move |_| log.lock().unwrap().push(4));
        });
    }
    clock.after_func(millis(1000), push(&log, 2));
    clock.after_func(millis(4500), push(&log, 5));
    {
        let tick_log = Arc::clone(&tick_log);
        let chained_clock = Arc::clone(&clock);
        clock.after_func(millis(400), move |_| {
            let tick_log = Arc::clone(&tick_log);
            chained_clock.every_func(millis(1000), move |_| {
                let mut tick_log = tick_log.lock().unwrap();
                tick_log.push(1);
                tick_log.len() < 4
            });
        });
    }

    assert_eq!(entries(&log), Vec::<u32>::new());

    clock
        .end_buffering(&NoCancel::new(), || clock.now())
        .unwrap();

    // Everything dated before "now" fired during the hand-off, in deadline
    // order.
    assert_eq!(entries(&log), vec![1, 2, 3, 4]);
    assert_eq!(entries(&tick_log), vec![1, 1, 1]);

    // Task 5 (due 500ms after the hand-off) and the 4th tick (due 400ms
    // after) fire via the live clock.
    thread::sleep(millis(1500));
    assert_eq!(entries(&log), vec![1, 2, 3, 4, 5]);
    assert_eq!(entries(&tick_log), vec![1, 1, 1, 1]);
}
