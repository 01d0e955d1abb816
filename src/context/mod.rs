//! Execution contexts.
//!
//! A [`Context`] ties a strand of application work to an execution venue.
//! An event-loop context is pinned to one event loop for its whole lifetime:
//! every task submitted through it runs on that loop's thread, in submission
//! order, with no overlap. A worker context runs its tasks on the worker
//! pool, still one at a time and in order, but on whichever worker thread is
//! free. A multi-threaded worker context runs its tasks on the pool with no
//! ordering at all.
//!
//! Contexts are identity-stable: the scheduler hands the same `Arc<Context>`
//! back to a thread for as long as the thread stays associated with it, and
//! an event-loop context never migrates to another loop.

pub(crate) mod registry;

use crate::error::ScheduleError;
use crate::eventloop::EventLoopHandle;
use crate::task::{Task, TaskHandle};
use crate::worker::WorkerPoolHandle;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Process-unique context id source.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How a context executes the tasks submitted through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Pinned to a single event loop; strict FIFO on that loop's thread.
    EventLoop,
    /// Runs on the worker pool, one task at a time, in submission order.
    Worker,
    /// Runs on the worker pool with no ordering; tasks may overlap.
    MultiThreadedWorker,
}

enum Binding {
    Loop(EventLoopHandle),
    Ordered(OrderedWorker),
    Pool(WorkerPoolHandle),
}

/// An execution context. Created and handed out by the scheduler; see
/// [`crate::scheduler::Scheduler::get_or_create_context`].
pub struct Context {
    id: u64,
    kind: ContextKind,
    created_at: Instant,
    binding: Binding,
}

impl Context {
    pub(crate) fn event_loop(handle: EventLoopHandle) -> Self {
        let context = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind: ContextKind::EventLoop,
            created_at: Instant::now(),
            binding: Binding::Loop(handle),
        };
        debug!(
            context_id = context.id,
            loop_index = context.event_loop_index(),
            "event loop context created"
        );
        context
    }

    pub(crate) fn worker(pool: WorkerPoolHandle) -> Self {
        let context = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind: ContextKind::Worker,
            created_at: Instant::now(),
            binding: Binding::Ordered(OrderedWorker::new(pool)),
        };
        debug!(context_id = context.id, "worker context created");
        context
    }

    pub(crate) fn multi_threaded_worker(pool: WorkerPoolHandle) -> Self {
        let context = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind: ContextKind::MultiThreadedWorker,
            created_at: Instant::now(),
            binding: Binding::Pool(pool),
        };
        debug!(
            context_id = context.id,
            "multi-threaded worker context created"
        );
        context
    }

    /// Process-unique context id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// How this context executes its tasks.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// When this context was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Index of the event loop this context is pinned to. `None` for worker
    /// and multi-threaded worker contexts.
    #[must_use]
    pub fn event_loop_index(&self) -> Option<usize> {
        match &self.binding {
            Binding::Loop(handle) => Some(handle.index()),
            Binding::Ordered(_) | Binding::Pool(_) => None,
        }
    }

    /// Submits `f` to run on this context.
    ///
    /// The task is appended to the context's queue and never runs inline,
    /// even when the caller already is on the target thread: a task
    /// submitted from within a running task always waits for the current
    /// task to return. Tasks submitted from one thread run in submission
    /// order (except on multi-threaded worker contexts, which drop
    /// ordering).
    ///
    /// # Errors
    ///
    /// Fails with [`ScheduleError`] when the backing loop or pool has been
    /// shut down.
    pub fn run_on_context<F>(self: &Arc<Self>, f: F) -> Result<TaskHandle, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (task, handle) = Task::new(f, Some(Arc::clone(self)));
        match &self.binding {
            Binding::Loop(loop_handle) => loop_handle.enqueue(task)?,
            Binding::Ordered(ordered) => ordered.schedule(task)?,
            Binding::Pool(pool) => pool.submit(task)?,
        }
        Ok(handle)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("event_loop", &self.event_loop_index())
            .finish()
    }
}

/// Serialization layer for [`ContextKind::Worker`].
///
/// Tasks land in a private FIFO queue; at most one of them is handed to the
/// worker pool at a time. The in-flight task carries a follow-up that
/// submits the next queued task when it finishes, so order is preserved and
/// tasks never overlap even though the pool itself is concurrent.
#[derive(Clone)]
struct OrderedWorker {
    pool: WorkerPoolHandle,
    queue: Arc<SegQueue<Task>>,
    in_flight: Arc<AtomicBool>,
}

impl OrderedWorker {
    fn new(pool: WorkerPoolHandle) -> Self {
        Self {
            pool,
            queue: Arc::new(SegQueue::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn schedule(&self, task: Task) -> Result<(), ScheduleError> {
        if self.pool.is_shut_down() {
            task.abandon();
            return Err(ScheduleError::SchedulerStopped);
        }
        self.queue.push(task);
        if self.in_flight.swap(true, Ordering::AcqRel) {
            // The current in-flight task's follow-up will pick ours up.
            return Ok(());
        }
        self.submit_next();
        Ok(())
    }

    /// Hands the next queued task to the pool. Caller must hold the
    /// in-flight flag.
    ///
    /// The handover uses the pool's ungated resubmission path: workers
    /// drain their queue before exiting, so a chain task accepted before
    /// shutdown still runs while the pool winds down instead of stranding
    /// everything queued behind it.
    fn submit_next(&self) {
        loop {
            if let Some(mut task) = self.queue.pop() {
                let chain = self.clone();
                task.follow_up = Some(Box::new(move || chain.submit_next()));
                self.pool.resubmit(task);
                return;
            }

            // Queue drained: release the flag, then recheck for a push that
            // raced the empty pop. Retake the flag only if we win it back.
            self.in_flight.store(false, Ordering::Release);
            if self.queue.is_empty() || self.in_flight.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }
}
