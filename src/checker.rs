//! Blocked-thread detection.
//!
//! A dedicated monitoring thread samples the activity cell of every event
//! loop and worker thread at a fixed interval. A thread still executing the
//! same task past its budget produces a [`BlockedThreadWarning`] on every
//! scan until the task completes, each report carrying the grown elapsed
//! duration. Once the elapsed duration passes the configured
//! `warning_exception_time`, warnings also carry the backtrace captured at
//! the task's enqueue site so the scheduling origin of the blocking task can
//! be located.
//!
//! Detection only: the checker never interrupts or kills a blocked thread,
//! and a warning never aborts the task it reports on.

use parking_lot::Mutex;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What a thread is currently executing, published for the checker.
///
/// The owning thread is the only writer: it stores a [`RunningTask`] when a
/// task body starts and clears the cell when the body returns. The checker
/// thread only reads.
pub(crate) struct ThreadActivity {
    running: Mutex<Option<RunningTask>>,
}

/// Snapshot of an in-flight task.
#[derive(Clone)]
pub(crate) struct RunningTask {
    pub(crate) task_id: u64,
    pub(crate) started_at: Instant,
    pub(crate) origin: Arc<Backtrace>,
}

impl ThreadActivity {
    pub(crate) fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    pub(crate) fn begin(&self, task_id: u64, origin: Arc<Backtrace>) {
        *self.running.lock() = Some(RunningTask {
            task_id,
            started_at: Instant::now(),
            origin,
        });
    }

    pub(crate) fn clear(&self) {
        *self.running.lock() = None;
    }

    pub(crate) fn sample(&self) -> Option<RunningTask> {
        self.running.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn begin_at(&self, task_id: u64, origin: Arc<Backtrace>, started_at: Instant) {
        *self.running.lock() = Some(RunningTask {
            task_id,
            started_at,
            origin,
        });
    }
}

/// The kind of thread a [`BlockedThreadWarning`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    /// An event loop thread; its budget is `max_execute_time`.
    EventLoop,
    /// A worker pool thread; its budget is `max_worker_execute_time`.
    Worker,
}

impl fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventLoop => f.write_str("event-loop"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

/// Warning emitted when a thread overstays its execution budget.
///
/// Emitted repeatedly, once per checker scan, while the same task remains in
/// flight. Non-fatal and observability-only.
#[derive(Debug, Clone)]
pub struct BlockedThreadWarning {
    /// Name of the blocked thread.
    pub thread_name: String,
    /// Whether the thread is an event loop or a worker.
    pub thread_kind: ThreadKind,
    /// Id of the task occupying the thread.
    pub task_id: u64,
    /// How long the task has been executing.
    pub blocked_for: Duration,
    /// The budget the thread was measured against.
    pub budget: Duration,
    /// Backtrace of the task's enqueue site, present once `blocked_for`
    /// exceeds the configured `warning_exception_time`. Empty unless
    /// backtraces are enabled via `RUST_BACKTRACE`.
    pub enqueue_trace: Option<Arc<Backtrace>>,
}

/// Callback invoked with each [`BlockedThreadWarning`].
pub type WarningHandler = Arc<dyn Fn(BlockedThreadWarning) + Send + Sync>;

/// Default warning handler: logs through `tracing` at warn level.
pub fn default_warning_handler(warning: BlockedThreadWarning) {
    let blocked_ms = warning.blocked_for.as_millis();
    let budget_ms = warning.budget.as_millis();
    let trace = warning
        .enqueue_trace
        .as_ref()
        .filter(|trace| trace.status() == BacktraceStatus::Captured);
    match trace {
        Some(trace) => warn!(
            thread = %warning.thread_name,
            kind = %warning.thread_kind,
            task_id = warning.task_id,
            "thread has been blocked for {blocked_ms} ms, time limit is {budget_ms} ms; \
             task enqueued at:\n{trace}"
        ),
        None => warn!(
            thread = %warning.thread_name,
            kind = %warning.thread_kind,
            task_id = warning.task_id,
            "thread has been blocked for {blocked_ms} ms, time limit is {budget_ms} ms"
        ),
    }
}

/// A thread registered with the checker.
pub(crate) struct WatchedThread {
    pub(crate) name: String,
    pub(crate) kind: ThreadKind,
    pub(crate) budget: Duration,
    pub(crate) activity: Arc<ThreadActivity>,
}

/// The monitoring thread.
///
/// Owns its shutdown signal; [`stop`](Self::stop) (or drop) wakes the thread
/// and joins it.
pub(crate) struct BlockedThreadChecker {
    shutdown: Arc<(StdMutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl BlockedThreadChecker {
    pub(crate) fn start(
        thread_name: String,
        check_interval: Duration,
        warning_exception_time: Duration,
        watched: Vec<WatchedThread>,
        handler: WarningHandler,
    ) -> Self {
        let shutdown = Arc::new((StdMutex::new(false), Condvar::new()));
        let shutdown_signal = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                debug!(
                    watched = watched.len(),
                    interval_ms = check_interval.as_millis(),
                    "blocked thread checker started"
                );
                loop {
                    let stopped = {
                        let (lock, cvar) = &*shutdown_signal;
                        let guard = lock.lock().unwrap();
                        if *guard {
                            true
                        } else {
                            // A spurious wakeup just causes an early scan.
                            let (guard, _) = cvar.wait_timeout(guard, check_interval).unwrap();
                            *guard
                        }
                    };
                    if stopped {
                        break;
                    }
                    scan(&watched, warning_exception_time, handler.as_ref());
                }
                debug!("blocked thread checker stopped");
            })
            .expect("failed to spawn blocked thread checker");

        Self {
            shutdown,
            thread: Some(thread),
        }
    }

    pub(crate) fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.shutdown;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BlockedThreadChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for BlockedThreadChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockedThreadChecker")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

/// One pass over every watched thread.
fn scan(
    watched: &[WatchedThread],
    warning_exception_time: Duration,
    handler: &(dyn Fn(BlockedThreadWarning) + Send + Sync),
) {
    let now = Instant::now();
    for thread in watched {
        let Some(running) = thread.activity.sample() else {
            continue;
        };
        let blocked_for = now.saturating_duration_since(running.started_at);
        if blocked_for < thread.budget {
            continue;
        }
        let enqueue_trace =
            (blocked_for >= warning_exception_time).then(|| Arc::clone(&running.origin));
        handler(BlockedThreadWarning {
            thread_name: thread.name.clone(),
            thread_kind: thread.kind,
            task_id: running.task_id,
            blocked_for,
            budget: thread.budget,
            enqueue_trace,
        });
    }
}
