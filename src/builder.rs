//! Scheduler construction.
//!
//! The builder collects configuration from any mix of sources, then
//! validates once at [`build`](SchedulerBuilder::build). Later sources win:
//! start from defaults or an explicit [`SchedulerConfig`], layer TOML and
//! environment overrides in the order the methods are called, and finish
//! with individual setters.

use crate::checker::{default_warning_handler, BlockedThreadWarning, WarningHandler};
use crate::config::{self, SchedulerConfig};
use crate::error::ConfigError;
use crate::scheduler::Scheduler;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    warning_handler: Option<WarningHandler>,
}

impl SchedulerBuilder {
    /// Starts from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            warning_handler: None,
        }
    }

    /// Starts from an explicit configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            warning_handler: None,
        }
    }

    /// Number of event loops. Defaults to the host's core count.
    #[must_use]
    pub fn event_loop_size(mut self, size: usize) -> Self {
        self.config.event_loop_size = size;
        self
    }

    /// Number of worker pool threads.
    #[must_use]
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    /// Budget an event loop task may run before warnings start.
    #[must_use]
    pub fn max_execute_time(mut self, budget: Duration) -> Self {
        self.config.max_execute_time = budget;
        self
    }

    /// Budget a worker task may run before warnings start.
    #[must_use]
    pub fn max_worker_execute_time(mut self, budget: Duration) -> Self {
        self.config.max_worker_execute_time = budget;
        self
    }

    /// How often the blocked-thread checker samples thread activity.
    #[must_use]
    pub fn blocked_thread_check_interval(mut self, interval: Duration) -> Self {
        self.config.blocked_thread_check_interval = interval;
        self
    }

    /// Elapsed time past which warnings include the enqueue-site backtrace.
    #[must_use]
    pub fn warning_exception_time(mut self, threshold: Duration) -> Self {
        self.config.warning_exception_time = threshold;
        self
    }

    /// Enables or disables the blocked-thread checker thread.
    #[must_use]
    pub fn blocked_thread_checker_enabled(mut self, enabled: bool) -> Self {
        self.config.blocked_thread_checker_enabled = enabled;
        self
    }

    /// Prefix for every thread name the scheduler spawns.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Replaces the default log-based handler for blocked-thread warnings.
    #[must_use]
    pub fn on_blocked_thread_warning<F>(mut self, handler: F) -> Self
    where
        F: Fn(BlockedThreadWarning) + Send + Sync + 'static,
    {
        self.warning_handler = Some(Arc::new(handler));
        self
    }

    /// Layers `CAROUSEL_*` environment variables over the current
    /// configuration. See [`crate::config`] for the variable names.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::InvalidEnvValue`] on an unparsable value.
    pub fn from_env(mut self) -> Result<Self, ConfigError> {
        config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Layers a TOML document over the current configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::Toml`] on a malformed document.
    pub fn from_toml_str(mut self, toml_str: &str) -> Result<Self, ConfigError> {
        let parsed = config::parse_toml_str(toml_str)?;
        config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// Layers a TOML file over the current configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Toml`] if it does not parse.
    pub fn from_toml_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let parsed = config::parse_toml_file(path.as_ref())?;
        config::apply_toml_config(&mut self.config, &parsed);
        Ok(self)
    }

    /// Validates the configuration and starts the scheduler's threads.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError`] naming the offending option; no threads
    /// are spawned in that case.
    pub fn build(self) -> Result<Scheduler, ConfigError> {
        self.config.validate()?;
        let handler = self
            .warning_handler
            .unwrap_or_else(|| Arc::new(default_warning_handler));
        Ok(Scheduler::start(self.config, handler))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("custom_warning_handler", &self.warning_handler.is_some())
            .finish()
    }
}
