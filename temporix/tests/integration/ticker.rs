//! Ticker semantics against the simulator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use temporix::cancel::NoCancel;
use temporix::clock::{Clock, MonotonicTime, Ticker};
use temporix::simulator::Simulator;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(60 * m)
}

type TickLog = Arc<Mutex<Vec<u32>>>;

fn ticks(log: &TickLog) -> Vec<u32> {
    log.lock().unwrap().clone()
}

/// Tickers are stopped and reset from within other tasks while the queue is
/// being drained; a predicate returning `false` terminates its ticker.
#[test]
fn tickers_obey_stop_and_reset_while_draining() {
    let t0 = MonotonicTime::EPOCH;
    let sim = Simulator::new(t0);

    let res1: TickLog = Arc::default();
    let res2: TickLog = Arc::default();
    let res3: TickLog = Arc::default();

    {
        let res1 = Arc::clone(&res1);
        sim.every_func(minutes(1), move |_| {
            let mut res1 = res1.lock().unwrap();
            res1.push(1);
            res1.len() < 3
        });
    }

    let ticker2: Arc<dyn Ticker> = {
        let res2 = Arc::clone(&res2);
        Arc::from(sim.every_func(minutes(1), move |_| {
            res2.lock().unwrap().push(1);
            true
        }))
    };

    let ticker3: Arc<dyn Ticker> = {
        let res3 = Arc::clone(&res3);
        Arc::from(sim.every_func(minutes(1), move |_| {
            res3.lock().unwrap().push(1);
            true
        }))
    };

    {
        let sim = sim.clone();
        let logs = (Arc::clone(&res1), Arc::clone(&res2), Arc::clone(&res3));
        let ticker2 = Arc::clone(&ticker2);
        let ticker3 = Arc::clone(&ticker3);

        sim.clone().after_func(minutes(2) + secs(1), move |_| {
            let (res1, res2, res3) = &logs;
            assert_eq!(ticks(res1), vec![1, 1]);
            assert_eq!(ticks(res2), vec![1, 1]);
            assert_eq!(ticks(res3), vec![1, 1]);

            assert!(ticker2.stop());
            assert!(ticker3.stop());

            let logs = logs.clone();
            let ticker3 = Arc::clone(&ticker3);
            let inner_sim = sim.clone();
            sim.after_func(minutes(1) - secs(1), move |_| {
                let (res1, res2, res3) = &logs;
                assert_eq!(ticks(res1), vec![1, 1, 1]);
                assert_eq!(ticks(res2), vec![1, 1]);
                assert_eq!(ticks(res3), vec![1, 1]);

                // Re-arm the stopped ticker3: next firing in 30s, then every
                // minute again.
                assert!(!ticker3.reset(secs(30)));

                {
                    let logs = logs.clone();
                    inner_sim.after_func(secs(31), move |_| {
                        let (res1, res2, res3) = &logs;
                        assert_eq!(ticks(res1), vec![1, 1, 1]);
                        assert_eq!(ticks(res2), vec![1, 1]);
                        assert_eq!(ticks(res3), vec![1, 1, 1]);
                    });
                }

                let logs = logs.clone();
                let ticker3 = Arc::clone(&ticker3);
                let chained_sim = inner_sim.clone();
                inner_sim.after_func(secs(31) + minutes(1), move |_| {
                    let (res1, res2, res3) = &logs;
                    assert_eq!(ticks(res1), vec![1, 1, 1]);
                    assert_eq!(ticks(res2), vec![1, 1]);
                    assert_eq!(ticks(res3), vec![1, 1, 1, 1]);

                    assert!(ticker3.stop());

                    let logs = logs.clone();
                    chained_sim.after_func(minutes(5), move |_| {
                        let (res1, res2, res3) = &logs;
                        assert_eq!(ticks(res1), vec![1, 1, 1]);
                        assert_eq!(ticks(res2), vec![1, 1]);
                        assert_eq!(ticks(res3), vec![1, 1, 1, 1]);
                    });
                });
            });
        });
    }

    assert_eq!(ticks(&res1), Vec::<u32>::new());

    sim.process_all(&NoCancel::new()).unwrap();

    assert_eq!(ticks(&res1), vec![1, 1, 1]);
    assert_eq!(ticks(&res2), vec![1, 1]);
    assert_eq!(ticks(&res3), vec![1, 1, 1, 1]);
}

/// A predicate returning `true` for the first N firings and `false` on
/// firing N+1 yields exactly N+1 firings, no matter how often the queue is
/// drained afterwards.
#[test]
fn ticker_terminates_after_predicate_declines() {
    const N: usize = 3;

    let sim = Simulator::new(MonotonicTime::EPOCH);
    let firings = Arc::new(AtomicUsize::new(0));

    let firings_writer = Arc::clone(&firings);
    sim.every_func(secs(10), move |_| {
        firings_writer.fetch_add(1, Ordering::Relaxed) < N
    });

    assert_eq!(sim.process_all(&NoCancel::new()), Ok(N + 1));
    assert_eq!(firings.load(Ordering::Relaxed), N + 1);

    assert_eq!(sim.process_all(&NoCancel::new()), Ok(0));
    assert_eq!(firings.load(Ordering::Relaxed), N + 1);
}

/// Resetting a ticker moves only the next firing; later firings stay on the
/// original period, anchored at the re-armed deadline.
#[test]
fn ticker_reset_preserves_the_period() {
    let t0 = MonotonicTime::EPOCH;
    let sim = Simulator::new(t0);

    let firings = Arc::new(Mutex::new(Vec::new()));
    let firings_writer = Arc::clone(&firings);
    let ticker: Arc<dyn Ticker> = Arc::from(sim.every_func(secs(10), move |now| {
        firings_writer.lock().unwrap().push(now);
        true
    }));

    {
        let ticker = Arc::clone(&ticker);
        sim.after_func(secs(5), move |_| {
            assert!(ticker.reset(secs(2)));
        });
    }

    sim.process_all_until(&NoCancel::new(), Some(t0 + secs(30)))
        .unwrap();

    assert_eq!(
        *firings.lock().unwrap(),
        vec![t0 + secs(7), t0 + secs(17), t0 + secs(27)]
    );
}
