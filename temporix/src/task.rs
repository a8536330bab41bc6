//! Scheduled tasks and the deadline-ordered task queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{MonotonicTime, TickerFn, TimerFn};
use crate::util::priority_queue::{InsertKey, PriorityQueue};

/// A one-shot action shared between a queued task and its timer handle.
pub(crate) type SharedTimerFn = Arc<Mutex<TimerFn>>;

/// A periodic predicate action shared between a queued task and its ticker
/// handle.
pub(crate) type SharedTickerFn = Arc<Mutex<TickerFn>>;

/// Back-reference from a task to its current queue registration.
///
/// The binding holds the queue insertion key iff the task is currently
/// pending. It is shared between the queued task and the handle wrapping it,
/// and is only ever mutated by the queue itself, under the owning scheduler's
/// exclusive lock.
#[derive(Debug)]
pub(crate) struct TaskBinding(Mutex<Option<InsertKey>>);

impl TaskBinding {
    /// Creates a binding in the not-pending state.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(None)))
    }

    fn attach(&self, key: InsertKey) {
        *self.0.lock().unwrap() = Some(key);
    }

    fn detach(&self) -> Option<InsertKey> {
        self.0.lock().unwrap().take()
    }
}

/// The atomic unit of scheduled work.
///
/// A task does not know its own deadline: the deadline is the key under which
/// the task is queued, and is handed back to [`Task::run`] when the task is
/// executed. Periodic tasks re-arm by returning a follow-up task together
/// with its deadline; one-shot tasks return `None`.
pub(crate) struct Task {
    binding: Arc<TaskBinding>,
    kind: TaskKind,
}

enum TaskKind {
    OneShot {
        action: SharedTimerFn,
    },
    Periodic {
        period: Duration,
        action: SharedTickerFn,
    },
}

impl Task {
    /// Creates a one-shot task.
    pub(crate) fn one_shot(binding: Arc<TaskBinding>, action: SharedTimerFn) -> Self {
        Self {
            binding,
            kind: TaskKind::OneShot { action },
        }
    }

    /// Creates a self-rescheduling task firing every `period`.
    pub(crate) fn periodic(
        binding: Arc<TaskBinding>,
        period: Duration,
        action: SharedTickerFn,
    ) -> Self {
        Self {
            binding,
            kind: TaskKind::Periodic { period, action },
        }
    }

    fn binding(&self) -> &Arc<TaskBinding> {
        &self.binding
    }

    /// Runs the task's action and returns the follow-up task, if any,
    /// together with its deadline.
    ///
    /// `scheduled` is the deadline the task was queued under and anchors the
    /// re-arming grid of periodic tasks; `now` is the scheduler time observed
    /// when the task fires and is what the action receives.
    pub(crate) fn run(self, scheduled: MonotonicTime, now: MonotonicTime) -> Option<(MonotonicTime, Task)> {
        match self.kind {
            TaskKind::OneShot { action } => {
                let mut action = action.lock().unwrap();
                (*action)(now);

                None
            }
            TaskKind::Periodic { period, action } => {
                let rearm = {
                    let mut action = action.lock().unwrap();
                    (*action)(now)
                };

                rearm.then(|| {
                    (
                        scheduled + period,
                        Task::periodic(self.binding, period, action),
                    )
                })
            }
        }
    }
}

/// A deadline-ordered queue of pending tasks.
///
/// This is a thin wrapper over the associative priority queue that keeps
/// every contained task's [`TaskBinding`] in sync with its actual queue
/// registration: a task's binding holds an insertion key iff the task is in
/// the queue. All mutations must happen under the owning scheduler's
/// exclusive lock.
pub(crate) struct TaskQueue {
    queue: PriorityQueue<MonotonicTime, Task>,
}

impl TaskQueue {
    /// Creates an empty task queue.
    pub(crate) fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
        }
    }

    /// Enqueues a task under the given deadline.
    pub(crate) fn push(&mut self, deadline: MonotonicTime, task: Task) {
        let binding = Arc::clone(task.binding());
        let key = self.queue.insert(deadline, task);
        binding.attach(key);
    }

    /// Removes and returns the earliest-deadline task.
    pub(crate) fn pop(&mut self) -> Option<(MonotonicTime, Task)> {
        let (deadline, task) = self.queue.pull()?;
        task.binding().detach();

        Some((deadline, task))
    }

    /// Removes and returns the earliest-deadline task, but only if its
    /// deadline is strictly before `bound`. An unset bound always qualifies.
    pub(crate) fn pop_expiring_before(
        &mut self,
        bound: Option<MonotonicTime>,
    ) -> Option<(MonotonicTime, Task)> {
        let deadline = *self.queue.peek_key()?;
        if let Some(bound) = bound {
            if deadline >= bound {
                return None;
            }
        }

        self.pop()
    }

    /// Removes and returns the earliest-deadline task if its deadline is not
    /// after `now`.
    pub(crate) fn pop_expired(&mut self, now: MonotonicTime) -> Option<(MonotonicTime, Task)> {
        if *self.queue.peek_key()? > now {
            return None;
        }

        self.pop()
    }

    /// Returns the earliest pending deadline.
    pub(crate) fn peek_deadline(&self) -> Option<MonotonicTime> {
        self.queue.peek_key().copied()
    }

    /// Whether any task is pending.
    pub(crate) fn has_tasks(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Whether the earliest pending deadline is not after `before`.
    pub(crate) fn has_expired(&self, before: MonotonicTime) -> bool {
        match self.queue.peek_key() {
            Some(deadline) => *deadline <= before,
            None => false,
        }
    }

    /// Removes the task associated with the binding, reporting whether it was
    /// pending. Removing a non-pending task is a no-op.
    pub(crate) fn remove(&mut self, binding: &TaskBinding) -> bool {
        match binding.detach() {
            Some(key) => {
                let deleted = self.queue.delete(key);
                debug_assert!(deleted);

                deleted
            }
            None => false,
        }
    }

    /// Removes and returns every pending task with its deadline, earliest
    /// first, leaving the queue empty.
    pub(crate) fn drain(&mut self) -> Vec<(MonotonicTime, Task)> {
        let tasks = self.queue.drain();
        for (_, task) in &tasks {
            task.binding().detach();
        }

        tasks
    }
}
