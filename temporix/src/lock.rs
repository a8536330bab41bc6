//! Pluggable usage locks.
//!
//! All shared state of a [`Simulator`](crate::simulator::Simulator), namely
//! the current simulated time and the task queue, is guarded by a single
//! reader-writer *usage lock*. The lock implementation is pluggable through
//! the [`RawUsageLock`] trait so that callers which guarantee single-threaded
//! access can trade blocking synchronization for a zero-cost misuse detector:
//!
//! * [`BlockingLock`] (the default) is a conventional blocking reader-writer
//!   lock;
//! * [`SingleThreadLock`] never blocks and instead panics on any access
//!   pattern that would have required blocking, or on unbalanced releases.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Raw reader-writer lock mediating access to scheduler state.
///
/// Exclusive (write) acquisitions are mutually exclusive with all other
/// acquisitions; shared (read) acquisitions may be concurrent with each
/// other. Implementations are driven exclusively through the RAII guards of
/// the crate-internal lock wrapper, so lock/unlock calls are always balanced
/// and always paired on the same acquisition mode.
pub trait RawUsageLock: Send + Sync {
    /// Initial, unlocked lock state.
    const INIT: Self;

    /// Acquires the lock exclusively.
    fn lock_exclusive(&self);

    /// Releases an exclusive acquisition.
    fn unlock_exclusive(&self);

    /// Acquires the lock in shared mode.
    fn lock_shared(&self);

    /// Releases a shared acquisition.
    fn unlock_shared(&self);
}

/// A blocking reader-writer usage lock.
///
/// This is the default lock of a [`Simulator`](crate::simulator::Simulator).
/// It is a plain Mutex/Condvar reader-writer lock without any fairness
/// policy, which is adequate for the short, non-nested critical sections of
/// the scheduler.
#[derive(Debug)]
pub struct BlockingLock {
    state: Mutex<BlockingLockState>,
    condvar: Condvar,
}

#[derive(Debug)]
struct BlockingLockState {
    readers: usize,
    writer: bool,
}

impl RawUsageLock for BlockingLock {
    const INIT: Self = Self {
        state: Mutex::new(BlockingLockState {
            readers: 0,
            writer: false,
        }),
        condvar: Condvar::new(),
    };

    fn lock_exclusive(&self) {
        let mut state = self.state.lock().unwrap();
        while state.writer || state.readers != 0 {
            state = self.condvar.wait(state).unwrap();
        }
        state.writer = true;
    }

    fn unlock_exclusive(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.writer);
        state.writer = false;
        drop(state);
        self.condvar.notify_all();
    }

    fn lock_shared(&self) {
        let mut state = self.state.lock().unwrap();
        while state.writer {
            state = self.condvar.wait(state).unwrap();
        }
        state.readers += 1;
    }

    fn unlock_shared(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.readers != 0);
        state.readers -= 1;
        let notify = state.readers == 0;
        drop(state);
        if notify {
            self.condvar.notify_all();
        }
    }
}

/// A usage lock for single-threaded callers, acting as a misuse detector.
///
/// This lock never blocks. It merely tracks the acquisition state and panics
/// whenever it observes an access pattern that a blocking lock would have had
/// to serialize, or an unbalanced release: such patterns indicate that the
/// caller broke the single-thread usage contract. Note in particular that
/// re-entrant acquisition (e.g. calling back into the scheduler from code
/// that still holds a guard) counts as misuse and panics rather than
/// deadlocks.
///
/// The acquisition count is kept in an atomic for the sole purpose of making
/// the type `Sync`; it provides no actual synchronization.
#[derive(Debug)]
pub struct SingleThreadLock {
    // -1 when locked exclusively, otherwise the number of shared borrows.
    borrows: AtomicIsize,
}

impl RawUsageLock for SingleThreadLock {
    const INIT: Self = Self {
        borrows: AtomicIsize::new(0),
    };

    fn lock_exclusive(&self) {
        match self.borrows.load(Ordering::Relaxed) {
            0 => self.borrows.store(-1, Ordering::Relaxed),
            -1 => panic!("usage lock is already locked exclusively"),
            _ => panic!("usage lock is still locked in shared mode"),
        }
    }

    fn unlock_exclusive(&self) {
        if self.borrows.load(Ordering::Relaxed) != -1 {
            panic!("usage lock is not locked exclusively");
        }
        self.borrows.store(0, Ordering::Relaxed);
    }

    fn lock_shared(&self) {
        let borrows = self.borrows.load(Ordering::Relaxed);
        if borrows < 0 {
            panic!("usage lock is already locked exclusively");
        }
        self.borrows.store(borrows + 1, Ordering::Relaxed);
    }

    fn unlock_shared(&self) {
        let borrows = self.borrows.load(Ordering::Relaxed);
        if borrows <= 0 {
            panic!("usage lock is not locked in shared mode");
        }
        self.borrows.store(borrows - 1, Ordering::Relaxed);
    }
}

/// State guarded by a raw usage lock.
///
/// Read and write access is mediated by RAII guards. The guarded value is
/// only required to be `Send + Sync`: shared guards hand out `&T` to
/// possibly concurrent readers, exclusive guards hand out `&mut T` to a
/// single writer.
pub(crate) struct UsageLock<T, R: RawUsageLock> {
    raw: R,
    value: UnsafeCell<T>,
}

// Shared guards give concurrent `&T` access and exclusive guards transfer
// `&mut T` access between threads, hence the `Send + Sync` bound on `T`.
unsafe impl<T: Send + Sync, R: RawUsageLock> Send for UsageLock<T, R> {}
unsafe impl<T: Send + Sync, R: RawUsageLock> Sync for UsageLock<T, R> {}

impl<T, R: RawUsageLock> UsageLock<T, R> {
    /// Creates a usage lock in the unlocked state.
    pub(crate) fn new(value: T) -> Self {
        Self {
            raw: R::INIT,
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock in shared mode.
    pub(crate) fn read(&self) -> UsageReadGuard<'_, T, R> {
        self.raw.lock_shared();

        UsageReadGuard { lock: self }
    }

    /// Acquires the lock exclusively.
    pub(crate) fn write(&self) -> UsageWriteGuard<'_, T, R> {
        self.raw.lock_exclusive();

        UsageWriteGuard { lock: self }
    }
}

/// Shared access guard.
///
/// The lock is released when the guard is dropped.
pub(crate) struct UsageReadGuard<'a, T, R: RawUsageLock> {
    lock: &'a UsageLock<T, R>,
}

impl<T, R: RawUsageLock> Deref for UsageReadGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the raw lock is held in shared mode, so only other `&T`
        // borrows can exist.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T, R: RawUsageLock> Drop for UsageReadGuard<'_, T, R> {
    fn drop(&mut self) {
        self.lock.raw.unlock_shared();
    }
}

/// Exclusive access guard.
///
/// The lock is released when the guard is dropped.
pub(crate) struct UsageWriteGuard<'a, T, R: RawUsageLock> {
    lock: &'a UsageLock<T, R>,
}

impl<T, R: RawUsageLock> Deref for UsageWriteGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the raw lock is held exclusively.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T, R: RawUsageLock> DerefMut for UsageWriteGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the raw lock is held exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T, R: RawUsageLock> Drop for UsageWriteGuard<'_, T, R> {
    fn drop(&mut self) {
        self.lock.raw.unlock_exclusive();
    }
}
