//! Single-threaded event loops.
//!
//! Each [`EventLoop`] owns one OS thread draining one FIFO queue. Tasks run
//! to completion in submission order and nothing else ever runs on the loop
//! thread. Submission from the loop thread itself goes through the same
//! queue: a task scheduled while another is executing always waits for the
//! current task to return.

pub mod pool;

use crate::checker::ThreadActivity;
use crate::context::registry::ContextRegistry;
use crate::error::ScheduleError;
use crate::task::Task;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Lifecycle state of an event loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Parked, waiting for work.
    Idle,
    /// Executing queued tasks.
    Draining,
    /// Terminated. The queue no longer accepts tasks.
    Stopped,
}

const STATE_IDLE: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_STOPPED: u8 = 2;

fn state_from_u8(value: u8) -> LoopState {
    match value {
        STATE_IDLE => LoopState::Idle,
        STATE_DRAINING => LoopState::Draining,
        _ => LoopState::Stopped,
    }
}

/// Wakes the loop thread when work arrives.
///
/// The flag absorbs the race between an empty-queue check and the park call:
/// an unpark that lands in that window leaves the flag set and the park
/// returns immediately.
struct Parker {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.condvar.wait(ready).unwrap();
        }
        *ready = false;
    }

    fn unpark(&self) {
        *self.ready.lock().unwrap() = true;
        self.condvar.notify_one();
    }
}

struct LoopShared {
    index: usize,
    queue: SegQueue<Task>,
    parker: Parker,
    state: AtomicU8,
    shutdown: AtomicBool,
    activity: Arc<ThreadActivity>,
}

/// Cheap, cloneable submission handle for one event loop.
#[derive(Clone)]
pub(crate) struct EventLoopHandle {
    shared: Arc<LoopShared>,
}

impl EventLoopHandle {
    /// Appends a task to the loop's queue and wakes the loop thread.
    ///
    /// Never runs the task inline, even when called from the loop thread
    /// itself.
    pub(crate) fn enqueue(&self, task: Task) -> Result<(), ScheduleError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            // Wake anyone already waiting on the task before dropping it.
            task.abandon();
            return Err(ScheduleError::LoopStopped {
                index: self.shared.index,
            });
        }
        trace!(
            loop_index = self.shared.index,
            task_id = task.id,
            "task enqueued"
        );
        self.shared.queue.push(task);
        self.shared.parker.unpark();
        Ok(())
    }

    pub(crate) fn index(&self) -> usize {
        self.shared.index
    }

    pub(crate) fn state(&self) -> LoopState {
        state_from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub(crate) fn activity(&self) -> Arc<ThreadActivity> {
        Arc::clone(&self.shared.activity)
    }
}

impl fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("index", &self.shared.index)
            .field("state", &self.state())
            .finish()
    }
}

/// One event loop: a FIFO queue plus the dedicated thread draining it.
pub(crate) struct EventLoop {
    shared: Arc<LoopShared>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawns the loop thread. `index` is the loop's identity within its
    /// pool and `thread_name` its OS-visible name.
    pub(crate) fn start(index: usize, thread_name: String, registry: ContextRegistry) -> Self {
        let shared = Arc::new(LoopShared {
            index,
            queue: SegQueue::new(),
            parker: Parker::new(),
            state: AtomicU8::new(STATE_IDLE),
            shutdown: AtomicBool::new(false),
            activity: Arc::new(ThreadActivity::new()),
        });
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_loop(&loop_shared, &registry))
            .expect("failed to spawn event loop thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    pub(crate) fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn state(&self) -> LoopState {
        state_from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Stops accepting new tasks and wakes the thread so it can drain what
    /// is already queued and exit. Does not wait; pair with
    /// [`join`](Self::join).
    pub(crate) fn initiate_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.parker.unpark();
    }

    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Signals any task left in the queue after the loop thread has exited.
    ///
    /// An enqueue can race the shutdown flag and land after the loop's
    /// final empty-queue check; without this, such a task's waiter would
    /// hang forever. Returns how many tasks were abandoned.
    pub(crate) fn drain_abandoned(&self) -> usize {
        let mut count = 0;
        while let Some(task) = self.shared.queue.pop() {
            task.abandon();
            count += 1;
        }
        count
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("index", &self.shared.index)
            .field("state", &self.state())
            .field("pending", &self.shared.queue.len())
            .finish()
    }
}

fn run_loop(shared: &LoopShared, registry: &ContextRegistry) {
    debug!(loop_index = shared.index, "event loop started");
    loop {
        if shared.queue.is_empty() {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            shared.state.store(STATE_IDLE, Ordering::Release);
            shared.parker.park();
            continue;
        }
        shared.state.store(STATE_DRAINING, Ordering::Release);
        while let Some(task) = shared.queue.pop() {
            task.execute(registry, &shared.activity, Some(shared.index));
        }
    }
    shared.state.store(STATE_STOPPED, Ordering::Release);
    debug!(loop_index = shared.index, "event loop stopped");
}
