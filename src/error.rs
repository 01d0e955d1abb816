//! Error types for scheduler construction and task scheduling.
//!
//! Construction-time problems (bad pool sizing, malformed overrides) are
//! [`ConfigError`] values and abort the build. Runtime scheduling problems
//! are [`ScheduleError`] values; the only one a caller can hit is enqueueing
//! onto a scheduler that has already stopped.
//!
//! A third failure class has no error type on purpose: if a task bound to
//! one event loop is ever dequeued by a different loop, the dequeuing thread
//! panics with a `context affinity violation` message. That condition is a
//! scheduler bug, not a caller mistake, and it must not be swallowed by a
//! `Result` the caller might discard.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating or loading scheduler configuration.
///
/// All variants are fatal at construction: the scheduler refuses to start
/// with an invalid configuration rather than clamping values silently.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Event loop pool sized below one thread.
    #[error("event loop pool size must be at least 1, got {got}")]
    InvalidEventLoopSize {
        /// The rejected size.
        got: usize,
    },

    /// Worker pool sized below one thread.
    #[error("worker pool size must be at least 1, got {got}")]
    InvalidWorkerPoolSize {
        /// The rejected size.
        got: usize,
    },

    /// A duration option that must be positive was zero.
    #[error("{option} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending option.
        option: &'static str,
    },

    /// Thread name prefix was empty.
    #[error("thread name prefix must not be empty")]
    EmptyThreadNamePrefix,

    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvValue {
        /// The environment variable name.
        var: &'static str,
        /// What went wrong while parsing.
        reason: String,
    },

    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the file that failed to load.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A config file could not be parsed as TOML.
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors raised when enqueueing a task.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The scheduler has been shut down; no new tasks are accepted.
    #[error("scheduler is stopped")]
    SchedulerStopped,

    /// The target event loop has stopped.
    #[error("event loop {index} is stopped")]
    LoopStopped {
        /// Index of the stopped loop.
        index: usize,
    },
}
