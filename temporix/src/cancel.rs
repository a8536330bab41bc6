//! Cooperative cancellation of draining operations.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation signal.
///
/// The bulk draining operations
/// ([`Simulator::process_all()`](crate::simulator::Simulator::process_all)
/// and friends) poll the signal between task executions and return promptly
/// once it reports cancellation. The signal is an external collaborator: any
/// poll-for-done source (a shutdown flag, a deadline watchdog, a runtime's
/// cancellation token) can be adapted by implementing this trait.
pub trait CancelSignal {
    /// Whether cancellation was requested.
    fn is_cancelled(&self) -> bool;
}

impl<S: CancelSignal + ?Sized> CancelSignal for &S {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// A [`CancelSignal`] that never fires.
///
/// Choosing this signal makes draining operations run to completion
/// unconditionally.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoCancel {}

impl NoCancel {
    /// Constructs a new `NoCancel` object.
    pub fn new() -> Self {
        Self {}
    }
}

impl CancelSignal for NoCancel {
    /// Always returns `false`.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A cloneable, thread-safe cancellation flag.
///
/// All clones observe the same flag, so a flag can be handed to a draining
/// operation on one thread and cancelled from another.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Constructs a new, unset `CancelFlag`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    ///
    /// The flag cannot be reset.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl CancelSignal for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Error returned when a draining operation is interrupted by its
/// cancellation signal.
///
/// The number of tasks executed before the cancellation was observed is
/// always reported so that callers can account for partial progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cancelled {
    /// Number of tasks executed before cancellation.
    pub processed: usize,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "task processing was cancelled after {} task(s)",
            self.processed
        )
    }
}

impl Error for Cancelled {}
