//! Carousel: round-robin event-loop scheduler with thread-affine execution
//! contexts.
//!
//! # Overview
//!
//! Carousel runs application work on a fixed pool of single-threaded event
//! loops plus a bounded worker pool for blocking tasks. Each strand of work
//! is tied to a [`Context`]: an event-loop context is pinned to one loop for
//! its entire lifetime, so everything submitted through it executes on the
//! same thread, in order, with no locks needed in application code. Threads
//! are assigned their context on first use, round-robin across the loops.
//!
//! The one rule this model imposes is: never block the event loop. A
//! dedicated checker thread watches every loop and worker, and logs
//! escalating warnings, with the blocking task's enqueue-site backtrace,
//! when a task overstays its budget.
//!
//! # Core Guarantees
//!
//! - **Affinity**: an event-loop context executes every task on the same
//!   loop thread, from creation to shutdown
//! - **Run to completion**: a task, once started, is never preempted,
//!   migrated, or killed; not by cancellation and not by the checker
//! - **FIFO**: tasks submitted to a context from one thread run in
//!   submission order (multi-threaded worker contexts excepted, by design)
//! - **Never inline**: submission always queues, even from the target
//!   thread itself
//! - **Isolation**: a panicking task is caught and logged; its queue keeps
//!   draining
//!
//! # Module Structure
//!
//! - [`scheduler`]: The root object tying loops, workers, registry, and
//!   checker together
//! - [`builder`]: Construction and configuration layering
//! - [`config`]: Options, defaults, environment and TOML sources
//! - [`context`]: Execution contexts and the thread-to-context registry
//! - [`eventloop`]: Loop threads and the round-robin pool
//! - [`worker`]: The bounded worker pool
//! - [`checker`]: Blocked-thread detection
//! - [`task`]: Queued tasks and caller-side handles
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use carousel::Scheduler;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), carousel::ConfigError> {
//! let scheduler = Scheduler::builder()
//!     .event_loop_size(4)
//!     .thread_name_prefix("app")
//!     .build()?;
//!
//! let context = scheduler.get_or_create_context();
//! let task = context.run_on_context(|| {
//!     // runs on this context's event loop thread
//! }).unwrap();
//! task.wait();
//!
//! scheduler.shutdown_and_wait(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod builder;
pub mod checker;
pub mod config;
pub mod context;
pub mod error;
pub mod eventloop;
pub mod scheduler;
pub mod task;
pub mod test_utils;
pub mod worker;

// Re-exports for convenient access to core types
pub use builder::SchedulerBuilder;
pub use checker::{default_warning_handler, BlockedThreadWarning, ThreadKind};
pub use config::SchedulerConfig;
pub use context::{Context, ContextKind};
pub use error::{ConfigError, ScheduleError};
pub use eventloop::LoopState;
pub use scheduler::Scheduler;
pub use task::TaskHandle;
