//! Fixed-size event loop pool with round-robin assignment.

use super::{EventLoop, EventLoopHandle, LoopState};
use crate::context::registry::ContextRegistry;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// All event loops of one scheduler.
///
/// The pool is created at a fixed size and every loop thread starts
/// immediately. Assignment is a single atomic counter taken modulo the pool
/// size, so concurrent [`acquire_next`](Self::acquire_next) calls each get a
/// distinct ticket and the sequence of assigned loops cycles `0, 1, ...,
/// size - 1` forever.
pub(crate) struct EventLoopPool {
    /// Loop owners, locked only at shutdown for joining.
    owners: Mutex<Vec<EventLoop>>,
    handles: Vec<EventLoopHandle>,
    next: AtomicUsize,
}

impl EventLoopPool {
    /// Starts `size` event loops. Size is validated upstream; the pool
    /// itself requires only that it is nonzero.
    pub(crate) fn start(size: usize, thread_name_prefix: &str, registry: &ContextRegistry) -> Self {
        assert!(size > 0, "event loop pool requires at least one loop");
        let loops: Vec<EventLoop> = (0..size)
            .map(|index| {
                EventLoop::start(
                    index,
                    format!("{thread_name_prefix}-eventloop-{index}"),
                    registry.clone(),
                )
            })
            .collect();
        let handles = loops.iter().map(EventLoop::handle).collect();
        debug!(size, "event loop pool started");
        Self {
            owners: Mutex::new(loops),
            handles,
            next: AtomicUsize::new(0),
        }
    }

    /// Returns the next loop in rotation. Never fails and never blocks.
    ///
    /// The ticket counter wraps on `usize` overflow; every ticket still maps
    /// into `0..size`, the rotation merely restarts mid-cycle at the wrap.
    pub(crate) fn acquire_next(&self) -> EventLoopHandle {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        self.handles[ticket % self.handles.len()].clone()
    }

    pub(crate) fn size(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn handles(&self) -> &[EventLoopHandle] {
        &self.handles
    }

    pub(crate) fn states(&self) -> Vec<LoopState> {
        self.handles.iter().map(EventLoopHandle::state).collect()
    }

    /// Stops every loop and waits for each to drain and exit.
    ///
    /// Returns `true` if all loop threads terminated within `timeout`.
    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        let mut owners = self.owners.lock().unwrap();
        for event_loop in owners.iter() {
            event_loop.initiate_shutdown();
        }

        let deadline = Instant::now() + timeout;
        loop {
            let stopped = self
                .handles
                .iter()
                .all(|handle| handle.state() == LoopState::Stopped);
            if stopped {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = timeout.as_millis(),
                    "event loop pool shutdown timed out with loops still draining"
                );
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        for event_loop in owners.iter_mut() {
            event_loop.join();
        }

        let abandoned: usize = owners.iter().map(EventLoop::drain_abandoned).sum();
        if abandoned > 0 {
            warn!(
                count = abandoned,
                "tasks caught by shutdown were completed without running"
            );
        }
        debug!("event loop pool stopped");
        true
    }
}

impl fmt::Debug for EventLoopPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopPool")
            .field("size", &self.handles.len())
            .field("states", &self.states())
            .finish()
    }
}
