//! Bounded worker pool for blocking tasks.
//!
//! A fixed set of threads draining one shared injection queue. Tasks from
//! different submitters interleave freely and may run concurrently, up to
//! the pool size. Ordering guarantees for worker contexts are layered on
//! top by [`crate::context`]; the pool itself promises only that every
//! accepted task eventually runs (or is skipped as cancelled) on some
//! worker thread.
//!
//! Worker threads are watched by the blocked-thread checker like event loop
//! threads are, against the far larger worker budget.

use crate::checker::ThreadActivity;
use crate::context::registry::ContextRegistry;
use crate::error::ScheduleError;
use crate::task::Task;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long an idle worker sleeps before rechecking the queue. Bounds the
/// cost of a wakeup lost to the submit/wait race.
const IDLE_RECHECK: Duration = Duration::from_millis(100);

struct WorkerShared {
    queue: SegQueue<Task>,
    shutdown: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
    active_threads: AtomicUsize,
    registry: ContextRegistry,
}

/// The worker pool. Owns the threads; submission goes through
/// [`WorkerPoolHandle`].
pub(crate) struct WorkerPool {
    shared: Arc<WorkerShared>,
    activities: Vec<Arc<ThreadActivity>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads named `{prefix}-worker-{n}`.
    pub(crate) fn start(size: usize, thread_name_prefix: &str, registry: &ContextRegistry) -> Self {
        assert!(size > 0, "worker pool requires at least one thread");
        let shared = Arc::new(WorkerShared {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
            active_threads: AtomicUsize::new(size),
            registry: registry.clone(),
        });

        let mut activities = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);
        for n in 0..size {
            let activity = Arc::new(ThreadActivity::new());
            activities.push(Arc::clone(&activity));
            let worker_shared = Arc::clone(&shared);
            let thread = thread::Builder::new()
                .name(format!("{thread_name_prefix}-worker-{n}"))
                .spawn(move || worker_loop(&worker_shared, &activity))
                .expect("failed to spawn worker thread");
            threads.push(thread);
        }
        debug!(size, "worker pool started");

        Self {
            shared,
            activities,
            threads: Mutex::new(threads),
        }
    }

    pub(crate) fn handle(&self) -> WorkerPoolHandle {
        WorkerPoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.activities.len()
    }

    /// Activity cells in thread order, for checker registration.
    pub(crate) fn activities(&self) -> &[Arc<ThreadActivity>] {
        &self.activities
    }

    /// Stops accepting tasks, drains the queue, and waits for every worker
    /// thread to exit. Returns `true` if the pool wound down within
    /// `timeout`.
    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.lock.lock().unwrap();
            self.shared.condvar.notify_all();
        }

        let deadline = Instant::now() + timeout;
        while self.shared.active_threads.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = timeout.as_millis(),
                    remaining = self.shared.active_threads.load(Ordering::Acquire),
                    "worker pool shutdown timed out with threads still busy"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let mut threads = self.threads.lock().unwrap();
        for thread in threads.drain(..) {
            let _ = thread.join();
        }

        // A submit can race the shutdown flag and land after the last
        // worker's final empty-queue check. Signal such leftovers so their
        // waiters do not hang; their follow-ups unwind any chain behind
        // them.
        let mut abandoned = 0;
        while let Some(task) = self.shared.queue.pop() {
            task.abandon();
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(
                count = abandoned,
                "worker tasks caught by shutdown were completed without running"
            );
        }
        debug!("worker pool stopped");
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.activities.len())
            .field("pending", &self.shared.queue.len())
            .field(
                "active_threads",
                &self.shared.active_threads.load(Ordering::Acquire),
            )
            .finish()
    }
}

/// Cheap, cloneable submission handle for the worker pool.
#[derive(Clone)]
pub(crate) struct WorkerPoolHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerPoolHandle {
    pub(crate) fn submit(&self, task: Task) -> Result<(), ScheduleError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            // Wake anyone already waiting on the task before dropping it.
            task.abandon();
            return Err(ScheduleError::SchedulerStopped);
        }
        self.resubmit(task);
        Ok(())
    }

    /// Enqueues without the shutdown gate.
    ///
    /// Used by ordered worker contexts to hand the next chained task over
    /// when the previous one finishes. The caller is a worker thread that is
    /// still running, and workers drain the queue before exiting, so a chain
    /// task accepted here still runs even while the pool is shutting down.
    pub(crate) fn resubmit(&self, task: Task) {
        trace!(task_id = task.id, "worker task enqueued");
        self.shared.queue.push(task);
        // Taking the lock pairs the notify with the waiter's recheck, so a
        // wakeup cannot fall between its queue check and its wait.
        let _guard = self.shared.lock.lock().unwrap();
        self.shared.condvar.notify_one();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field("pending", &self.shared.queue.len())
            .finish()
    }
}

fn worker_loop(shared: &WorkerShared, activity: &ThreadActivity) {
    loop {
        if let Some(task) = shared.queue.pop() {
            task.execute(&shared.registry, activity, None);
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let guard = shared.lock.lock().unwrap();
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            let _ = shared.condvar.wait_timeout(guard, IDLE_RECHECK).unwrap();
        }
    }
    shared.active_threads.fetch_sub(1, Ordering::AcqRel);
}
