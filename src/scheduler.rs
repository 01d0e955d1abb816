//! The scheduler: event loops, worker pool, context registry, and the
//! blocked-thread checker under one root object.
//!
//! A [`Scheduler`] is explicit and self-contained: constructing one spawns
//! its threads, dropping the last clone (or calling
//! [`shutdown_and_wait`](Scheduler::shutdown_and_wait)) winds them down.
//! Several schedulers can coexist in one process; nothing is global.

use crate::builder::SchedulerBuilder;
use crate::checker::{BlockedThreadChecker, ThreadKind, WarningHandler, WatchedThread};
use crate::config::SchedulerConfig;
use crate::context::registry::ContextRegistry;
use crate::context::Context;
use crate::error::{ConfigError, ScheduleError};
use crate::eventloop::pool::EventLoopPool;
use crate::eventloop::LoopState;
use crate::task::TaskHandle;
use crate::worker::WorkerPool;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Handle to one scheduler instance. Clones share the same loops, workers,
/// and registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: ContextRegistry,
    loops: EventLoopPool,
    workers: WorkerPool,
    checker: Mutex<Option<BlockedThreadChecker>>,
    shutdown: AtomicBool,
}

impl Scheduler {
    /// Starts a scheduler with default configuration: one event loop per
    /// host core and the default worker pool.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError`] if the defaults have been overridden into
    /// an invalid state (they are valid on their own).
    pub fn new() -> Result<Self, ConfigError> {
        SchedulerBuilder::new().build()
    }

    /// Starts a scheduler from an explicit configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError`] if the configuration is invalid.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, ConfigError> {
        SchedulerBuilder::with_config(config).build()
    }

    /// Entry point for customized construction.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Spawns all threads. The configuration has already been validated by
    /// the builder.
    pub(crate) fn start(config: SchedulerConfig, warning_handler: WarningHandler) -> Self {
        let registry = ContextRegistry::new();
        let prefix = config.thread_name_prefix.as_str();
        let loops = EventLoopPool::start(config.event_loop_size, prefix, &registry);
        let workers = WorkerPool::start(config.worker_pool_size, prefix, &registry);

        let checker = config.blocked_thread_checker_enabled.then(|| {
            let mut watched = Vec::with_capacity(loops.size() + workers.size());
            for handle in loops.handles() {
                watched.push(WatchedThread {
                    name: format!("{prefix}-eventloop-{}", handle.index()),
                    kind: ThreadKind::EventLoop,
                    budget: config.max_execute_time,
                    activity: handle.activity(),
                });
            }
            for (n, activity) in workers.activities().iter().enumerate() {
                watched.push(WatchedThread {
                    name: format!("{prefix}-worker-{n}"),
                    kind: ThreadKind::Worker,
                    budget: config.max_worker_execute_time,
                    activity: Arc::clone(activity),
                });
            }
            BlockedThreadChecker::start(
                format!("{prefix}-blocked-thread-checker"),
                config.blocked_thread_check_interval,
                config.warning_exception_time,
                watched,
                warning_handler,
            )
        });

        info!(
            event_loops = config.event_loop_size,
            workers = config.worker_pool_size,
            checker = checker.is_some(),
            "scheduler started"
        );
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                registry,
                loops,
                workers,
                checker: Mutex::new(checker),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the calling thread's context, assigning one on first call.
    ///
    /// The first call from a thread draws the next event loop from the
    /// round-robin rotation and binds the new context to it permanently;
    /// every later call from the same thread returns that same context.
    /// Event loop threads executing a task see the task's own context here.
    #[must_use]
    pub fn get_or_create_context(&self) -> Arc<Context> {
        self.inner.registry.get_or_create(|| {
            let handle = self.inner.loops.acquire_next();
            Arc::new(Context::event_loop(handle))
        })
    }

    /// The context currently associated with the calling thread, if any.
    #[must_use]
    pub fn current_context(&self) -> Option<Arc<Context>> {
        self.inner.registry.current()
    }

    /// Severs the calling thread's context association and returns it.
    ///
    /// The next [`get_or_create_context`](Self::get_or_create_context) from
    /// this thread creates a fresh context. The context itself stays valid
    /// for anyone still holding it.
    pub fn detach_context(&self) -> Option<Arc<Context>> {
        self.inner.registry.detach_current()
    }

    /// Submits `f` to the calling thread's context, creating the context
    /// first if the thread has none. See [`Context::run_on_context`].
    ///
    /// # Errors
    ///
    /// Fails with [`ScheduleError::SchedulerStopped`] after shutdown.
    pub fn run_on_context<F>(&self, f: F) -> Result<TaskHandle, ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ScheduleError::SchedulerStopped);
        }
        self.get_or_create_context().run_on_context(f)
    }

    /// Creates a worker context: tasks run on the worker pool, one at a
    /// time, in submission order. Never registered for any thread.
    #[must_use]
    pub fn worker_context(&self) -> Arc<Context> {
        Arc::new(Context::worker(self.inner.workers.handle()))
    }

    /// Creates a multi-threaded worker context: tasks run on the worker
    /// pool with no ordering and may overlap.
    #[must_use]
    pub fn multi_threaded_worker_context(&self) -> Arc<Context> {
        Arc::new(Context::multi_threaded_worker(self.inner.workers.handle()))
    }

    /// Number of event loops in the pool.
    #[must_use]
    pub fn event_loop_count(&self) -> usize {
        self.inner.loops.size()
    }

    /// Number of worker pool threads.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.inner.workers.size()
    }

    /// Lifecycle state of each event loop, by index.
    #[must_use]
    pub fn event_loop_states(&self) -> Vec<LoopState> {
        self.inner.loops.states()
    }

    /// Number of thread-to-context associations currently registered.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// The validated configuration this scheduler runs with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether shutdown has been initiated.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops the checker, drains and joins every event loop and worker
    /// thread. Further submissions are rejected. Idempotent.
    ///
    /// Returns `true` if everything wound down within `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.inner.shutdown_and_wait(timeout)
    }
}

impl SchedulerInner {
    fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        let first = !self.shutdown.swap(true, Ordering::AcqRel);
        if first {
            info!("scheduler shutting down");
        }
        if let Some(mut checker) = self.checker.lock().unwrap().take() {
            checker.stop();
        }
        let loops_ok = self.loops.shutdown_and_wait(timeout);
        let workers_ok = self.workers.shutdown_and_wait(timeout);
        if first {
            info!(clean = loops_ok && workers_ok, "scheduler stopped");
        }
        loops_ok && workers_ok
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::Acquire) {
            self.shutdown_and_wait(Duration::from_secs(5));
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("event_loops", &self.inner.loops.size())
            .field("workers", &self.inner.workers.size())
            .field("contexts", &self.inner.registry.len())
            .field("shutdown", &self.is_shut_down())
            .finish()
    }
}
