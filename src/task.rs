//! Task representation and per-task handles.
//!
//! Every enqueue produces a [`Task`] (queued, crate-internal) and a
//! [`TaskHandle`] (returned to the caller). Cancellation is soft: a handle
//! can mark a queued task cancelled and the executing thread skips it at
//! dequeue, but a task that has already started always runs to completion.

use crate::checker::ThreadActivity;
use crate::context::registry::ContextRegistry;
use crate::context::Context;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{error, trace};

/// Process-unique task id source, for tracing only.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of work queued onto an event loop or the worker pool.
pub(crate) struct Task {
    /// Unique task identifier.
    pub(crate) id: u64,
    /// The work to execute.
    pub(crate) work: Box<dyn FnOnce() + Send + 'static>,
    /// Cancellation flag, shared with the handle.
    pub(crate) cancelled: Arc<AtomicBool>,
    /// Completion signal, shared with the handle.
    pub(crate) completion: Arc<TaskCompletion>,
    /// Context the task was enqueued through, if any.
    ///
    /// The executing thread registers this context as its own for the
    /// duration of the task, and verifies loop affinity against it.
    pub(crate) context: Option<Arc<Context>>,
    /// Backtrace of the enqueue site, reported by the blocked-thread
    /// checker once a task overstays its budget. Empty unless backtraces
    /// are enabled via `RUST_BACKTRACE`.
    pub(crate) origin: Arc<Backtrace>,
    /// Runs on the executing thread after completion is signalled, on every
    /// path: normal return, panic, and cancellation skip. Ordered worker
    /// contexts chain their next submission through it.
    pub(crate) follow_up: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Task {
    /// Packages a closure into a queued task plus its caller-side handle.
    pub(crate) fn new<F>(f: F, context: Option<Arc<Context>>) -> (Self, TaskHandle)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let completion = Arc::new(TaskCompletion::new());

        let task = Self {
            id,
            work: Box::new(f),
            cancelled: Arc::clone(&cancelled),
            completion: Arc::clone(&completion),
            context,
            origin: Arc::new(Backtrace::capture()),
            follow_up: None,
        };
        let handle = TaskHandle {
            task_id: id,
            cancelled,
            completion,
        };
        (task, handle)
    }

    /// True if the handle cancelled this task before it was dequeued.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Signals completion and runs the follow-up without executing the body.
    ///
    /// For tasks that will never run: rejected at enqueue, or left in a
    /// queue after its executing threads have exited. Running the follow-up
    /// lets an ordered chain behind this task unwind instead of hanging.
    pub(crate) fn abandon(self) {
        trace!(task_id = self.id, "task abandoned without execution");
        self.completion.signal_done();
        if let Some(follow_up) = self.follow_up {
            follow_up();
        }
    }

    /// Executes the task body on the current thread.
    ///
    /// Shared by event loop and worker threads. Cancelled tasks are skipped;
    /// a task carrying a loop-affine context is verified against the
    /// dequeuing loop's index; the context becomes the current thread's
    /// registry entry for the duration of the body; activity is published
    /// for the blocked-thread checker; panics are isolated and logged.
    /// Completion is signalled on every path except an affinity violation,
    /// which panics the executing thread.
    pub(crate) fn execute(
        self,
        registry: &ContextRegistry,
        activity: &ThreadActivity,
        current_loop: Option<usize>,
    ) {
        let Self {
            id,
            work,
            cancelled,
            completion,
            context,
            origin,
            follow_up,
        } = self;

        if cancelled.load(Ordering::Acquire) {
            trace!(task_id = id, "skipping cancelled task");
            completion.signal_done();
            if let Some(follow_up) = follow_up {
                follow_up();
            }
            return;
        }

        if let (Some(actual), Some(ctx)) = (current_loop, context.as_ref()) {
            if let Some(bound) = ctx.event_loop_index() {
                if bound != actual {
                    error!(
                        task_id = id,
                        bound_loop = bound,
                        current_loop = actual,
                        "context affinity violation"
                    );
                    panic!(
                        "context affinity violation: task {id} is bound to event loop {bound} \
                         but was dequeued on event loop {actual}"
                    );
                }
            }
        }

        let entered = context.as_ref().map(|ctx| registry.enter(Arc::clone(ctx)));
        activity.begin(id, Arc::clone(&origin));
        trace!(task_id = id, "executing task");

        let result = catch_unwind(AssertUnwindSafe(work));

        activity.clear();
        if let Some(previous) = entered {
            registry.exit(previous);
        }
        if let Err(payload) = result {
            error!(
                task_id = id,
                panic = %panic_message(payload.as_ref()),
                "task panicked; subsequent tasks continue"
            );
        }
        completion.signal_done();
        if let Some(follow_up) = follow_up {
            follow_up();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("context", &self.context.as_ref().map(|c| c.id()))
            .finish()
    }
}

/// Completion tracking for a queued task.
pub(crate) struct TaskCompletion {
    /// Whether the task has completed (or was skipped as cancelled).
    done: AtomicBool,
    /// Condition variable for waiting.
    condvar: Condvar,
    /// Mutex for the condition variable.
    mutex: Mutex<()>,
}

impl TaskCompletion {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    pub(crate) fn signal_done(&self) {
        self.done.store(true, Ordering::Release);
        let _guard = self.mutex.lock().unwrap();
        self.condvar.notify_all();
    }

    fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.mutex.lock().unwrap();
        while !self.done.load(Ordering::Acquire) {
            guard = self.condvar.wait(guard).unwrap();
        }
        drop(guard);
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.mutex.lock().unwrap();
        while !self.done.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.condvar.wait_timeout(guard, remaining).unwrap();
            guard = result.0;
        }
        drop(guard);
        true
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Handle for an enqueued task.
///
/// Provides cancellation and completion waiting. Dropping the handle has no
/// effect on the task.
pub struct TaskHandle {
    /// Task ID for debugging.
    task_id: u64,
    /// Cancellation flag.
    cancelled: Arc<AtomicBool>,
    /// Completion tracking.
    completion: Arc<TaskCompletion>,
}

impl TaskHandle {
    /// Cancels this task.
    ///
    /// A task still sitting in a queue is skipped when dequeued. A task that
    /// is already executing runs to completion regardless; run-to-completion
    /// is absolute.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` once the task has run, panicked, or been skipped as
    /// cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Blocks the calling thread until the task completes.
    ///
    /// Never call this from an event loop thread; it blocks.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Blocks until the task completes or the timeout elapses.
    ///
    /// Returns `true` if the task completed, `false` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// The task's process-unique id.
    #[must_use]
    pub fn task_id(&self) -> u64 {
        self.task_id
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::thread;

    #[test]
    fn completion_signals_waiters() {
        let (task, handle) = Task::new(|| {}, None);
        assert!(!handle.is_done());

        task.completion.signal_done();
        assert!(handle.is_done());
        handle.wait(); // returns immediately
    }

    #[test]
    fn wait_timeout_expires_without_completion() {
        let (_task, handle) = Task::new(|| {}, None);
        assert!(!handle.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn wait_timeout_observes_completion_from_other_thread() {
        let (task, handle) = Task::new(|| {}, None);
        let completion = Arc::clone(&task.completion);

        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completion.signal_done();
        });

        assert!(handle.wait_timeout(Duration::from_secs(2)));
        signaller.join().expect("signaller panicked");
    }

    #[test]
    fn cancel_is_visible_to_task_side() {
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        let (task, handle) = Task::new(
            move || {
                c.fetch_add(1, Ordering::Relaxed);
            },
            None,
        );

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(task.is_cancelled());
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn abandon_signals_waiters_and_runs_follow_up() {
        let chained = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&chained);
        let (mut task, handle) = Task::new(|| {}, None);
        task.follow_up = Some(Box::new(move || flag.store(true, Ordering::Release)));

        task.abandon();
        assert!(handle.is_done());
        assert!(chained.load(Ordering::Acquire));
    }

    #[test]
    fn task_ids_are_unique() {
        let (a, _) = Task::new(|| {}, None);
        let (b, _) = Task::new(|| {}, None);
        assert_ne!(a.id, b.id);
    }
}
