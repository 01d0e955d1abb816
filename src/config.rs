//! Scheduler configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via builder methods (`event_loop_size(4)`)
//! 2. **Environment variables** — values from `CAROUSEL_*` env vars
//! 3. **Config file** — values loaded from a TOML file
//! 4. **Defaults** — built-in defaults from [`SchedulerConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CAROUSEL_EVENT_LOOP_SIZE` | `usize` | `event_loop_size` |
//! | `CAROUSEL_WORKER_POOL_SIZE` | `usize` | `worker_pool_size` |
//! | `CAROUSEL_MAX_EXECUTE_TIME_MS` | `u64` (ms) | `max_execute_time` |
//! | `CAROUSEL_MAX_WORKER_EXECUTE_TIME_MS` | `u64` (ms) | `max_worker_execute_time` |
//! | `CAROUSEL_BLOCKED_THREAD_CHECK_INTERVAL_MS` | `u64` (ms) | `blocked_thread_check_interval` |
//! | `CAROUSEL_WARNING_EXCEPTION_TIME_MS` | `u64` (ms) | `warning_exception_time` |
//! | `CAROUSEL_BLOCKED_THREAD_CHECKER_ENABLED` | `bool` | `blocked_thread_checker_enabled` |
//! | `CAROUSEL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//!
//! Invalid values are construction errors, never clamped: a scheduler built
//! from a bad configuration refuses to start.

use crate::error::ConfigError;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Default number of worker threads.
const DEFAULT_WORKER_POOL_SIZE: usize = 20;
/// Default execution budget for a single event loop task.
const DEFAULT_MAX_EXECUTE_TIME: Duration = Duration::from_millis(2000);
/// Default execution budget for a single worker task.
const DEFAULT_MAX_WORKER_EXECUTE_TIME: Duration = Duration::from_secs(60);
/// Default blocked-thread checker scan interval.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(1000);
/// Default blocked duration past which warnings carry the enqueue backtrace.
const DEFAULT_WARNING_EXCEPTION_TIME: Duration = Duration::from_millis(5000);
/// Default thread name prefix.
const DEFAULT_THREAD_NAME_PREFIX: &str = "carousel";

/// Environment variable name for the event loop pool size.
pub const ENV_EVENT_LOOP_SIZE: &str = "CAROUSEL_EVENT_LOOP_SIZE";
/// Environment variable name for the worker pool size.
pub const ENV_WORKER_POOL_SIZE: &str = "CAROUSEL_WORKER_POOL_SIZE";
/// Environment variable name for the event loop task budget, in milliseconds.
pub const ENV_MAX_EXECUTE_TIME_MS: &str = "CAROUSEL_MAX_EXECUTE_TIME_MS";
/// Environment variable name for the worker task budget, in milliseconds.
pub const ENV_MAX_WORKER_EXECUTE_TIME_MS: &str = "CAROUSEL_MAX_WORKER_EXECUTE_TIME_MS";
/// Environment variable name for the checker scan interval, in milliseconds.
pub const ENV_BLOCKED_THREAD_CHECK_INTERVAL_MS: &str = "CAROUSEL_BLOCKED_THREAD_CHECK_INTERVAL_MS";
/// Environment variable name for the backtrace escalation threshold, in milliseconds.
pub const ENV_WARNING_EXCEPTION_TIME_MS: &str = "CAROUSEL_WARNING_EXCEPTION_TIME_MS";
/// Environment variable name for the blocked-thread checker toggle.
pub const ENV_BLOCKED_THREAD_CHECKER_ENABLED: &str = "CAROUSEL_BLOCKED_THREAD_CHECKER_ENABLED";
/// Environment variable name for the thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "CAROUSEL_THREAD_NAME_PREFIX";

/// Configuration for a [`Scheduler`](crate::Scheduler).
///
/// All fields are public; construct via [`Default`] and adjust, or use
/// [`SchedulerBuilder`](crate::SchedulerBuilder). Validation happens once,
/// at scheduler construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of event loops, each with one dedicated thread.
    ///
    /// Defaults to the host's available parallelism.
    pub event_loop_size: usize,
    /// Number of worker threads for blocking tasks. Default 20.
    pub worker_pool_size: usize,
    /// Elapsed execution time past which an event loop task is reported as
    /// blocking its loop. Default 2000 ms.
    pub max_execute_time: Duration,
    /// Execution budget for worker threads, which are expected to block.
    /// Default 60 s.
    pub max_worker_execute_time: Duration,
    /// How often the blocked-thread checker samples thread activity.
    /// Default 1000 ms.
    pub blocked_thread_check_interval: Duration,
    /// Elapsed blocked duration past which warnings include the task's
    /// enqueue backtrace. Default 5000 ms.
    pub warning_exception_time: Duration,
    /// Whether the blocked-thread checker thread runs at all. Default true.
    pub blocked_thread_checker_enabled: bool,
    /// Prefix for every thread name the scheduler spawns. Default
    /// `"carousel"`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_loop_size: default_event_loop_size(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            max_execute_time: DEFAULT_MAX_EXECUTE_TIME,
            max_worker_execute_time: DEFAULT_MAX_WORKER_EXECUTE_TIME,
            blocked_thread_check_interval: DEFAULT_CHECK_INTERVAL,
            warning_exception_time: DEFAULT_WARNING_EXCEPTION_TIME,
            blocked_thread_checker_enabled: true,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Checks the configuration for values the scheduler cannot run with.
    ///
    /// Returns the first problem found. Called by the builder and by
    /// [`Scheduler::with_config`](crate::Scheduler::with_config); callers
    /// mutating the struct directly can invoke it early to fail fast.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_loop_size == 0 {
            return Err(ConfigError::InvalidEventLoopSize { got: 0 });
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidWorkerPoolSize { got: 0 });
        }
        if self.max_execute_time.is_zero() {
            return Err(ConfigError::ZeroDuration {
                option: "max_execute_time",
            });
        }
        if self.max_worker_execute_time.is_zero() {
            return Err(ConfigError::ZeroDuration {
                option: "max_worker_execute_time",
            });
        }
        if self.blocked_thread_check_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                option: "blocked_thread_check_interval",
            });
        }
        if self.warning_exception_time.is_zero() {
            return Err(ConfigError::ZeroDuration {
                option: "warning_exception_time",
            });
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::EmptyThreadNamePrefix);
        }
        Ok(())
    }
}

/// Returns the default event loop count: the host's available parallelism.
#[must_use]
pub fn default_event_loop_size() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .max(1)
}

/// Apply environment variable overrides to a [`SchedulerConfig`].
///
/// Only variables that are set in the environment are applied. Returns an
/// error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut SchedulerConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_EVENT_LOOP_SIZE) {
        config.event_loop_size = parse_usize(ENV_EVENT_LOOP_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_WORKER_POOL_SIZE) {
        config.worker_pool_size = parse_usize(ENV_WORKER_POOL_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_EXECUTE_TIME_MS) {
        config.max_execute_time = parse_duration_ms(ENV_MAX_EXECUTE_TIME_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_WORKER_EXECUTE_TIME_MS) {
        config.max_worker_execute_time = parse_duration_ms(ENV_MAX_WORKER_EXECUTE_TIME_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_BLOCKED_THREAD_CHECK_INTERVAL_MS) {
        config.blocked_thread_check_interval =
            parse_duration_ms(ENV_BLOCKED_THREAD_CHECK_INTERVAL_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_WARNING_EXCEPTION_TIME_MS) {
        config.warning_exception_time = parse_duration_ms(ENV_WARNING_EXCEPTION_TIME_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_BLOCKED_THREAD_CHECKER_ENABLED) {
        config.blocked_thread_checker_enabled =
            parse_bool(ENV_BLOCKED_THREAD_CHECKER_ENABLED, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnvValue {
            var,
            reason: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_duration_ms(var: &'static str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidEnvValue {
            var,
            reason: format!("expected milliseconds as unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvValue {
            var,
            reason: format!("expected bool (true/false/1/0/yes/no), got {val:?}"),
        }),
    }
}

// =========================================================================
// TOML config file support
// =========================================================================

/// TOML-deserializable scheduler configuration.
///
/// Mirrors [`SchedulerConfig`] with every field optional, grouped into TOML
/// tables:
///
/// ```toml
/// [scheduler]
/// event_loop_size = 4
/// worker_pool_size = 20
/// thread_name_prefix = "myapp"
///
/// [blocked_thread]
/// enabled = true
/// check_interval_ms = 1000
/// max_execute_time_ms = 2000
/// max_worker_execute_time_ms = 60000
/// warning_exception_time_ms = 5000
/// ```
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerTomlConfig {
    /// Pool sizing and thread naming.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Blocked-thread checker settings.
    #[serde(default)]
    pub blocked_thread: BlockedThreadToml,
}

/// Scheduler section of the TOML config.
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of event loops.
    pub event_loop_size: Option<usize>,
    /// Number of worker threads.
    pub worker_pool_size: Option<usize>,
    /// Name prefix for spawned threads.
    pub thread_name_prefix: Option<String>,
}

/// Blocked-thread checker section of the TOML config.
#[derive(serde::Deserialize, Default, Debug)]
pub struct BlockedThreadToml {
    /// Whether the checker runs.
    pub enabled: Option<bool>,
    /// Scan interval in milliseconds.
    pub check_interval_ms: Option<u64>,
    /// Event loop task budget in milliseconds.
    pub max_execute_time_ms: Option<u64>,
    /// Worker task budget in milliseconds.
    pub max_worker_execute_time_ms: Option<u64>,
    /// Backtrace escalation threshold in milliseconds.
    pub warning_exception_time_ms: Option<u64>,
}

/// Apply a parsed TOML config to a [`SchedulerConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
pub fn apply_toml_config(config: &mut SchedulerConfig, toml: &SchedulerTomlConfig) {
    if let Some(v) = toml.scheduler.event_loop_size {
        config.event_loop_size = v;
    }
    if let Some(v) = toml.scheduler.worker_pool_size {
        config.worker_pool_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.blocked_thread.enabled {
        config.blocked_thread_checker_enabled = v;
    }
    if let Some(v) = toml.blocked_thread.check_interval_ms {
        config.blocked_thread_check_interval = Duration::from_millis(v);
    }
    if let Some(v) = toml.blocked_thread.max_execute_time_ms {
        config.max_execute_time = Duration::from_millis(v);
    }
    if let Some(v) = toml.blocked_thread.max_worker_execute_time_ms {
        config.max_worker_execute_time = Duration::from_millis(v);
    }
    if let Some(v) = toml.blocked_thread.warning_exception_time_ms {
        config.warning_exception_time = Duration::from_millis(v);
    }
}

/// Parse a TOML string into a [`SchedulerTomlConfig`].
pub fn parse_toml_str(toml_str: &str) -> Result<SchedulerTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`SchedulerTomlConfig`].
pub fn parse_toml_file(path: &Path) -> Result<SchedulerTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    // Helper: set env vars for the duration of a closure, then unset.
    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_EVENT_LOOP_SIZE,
            ENV_WORKER_POOL_SIZE,
            ENV_MAX_EXECUTE_TIME_MS,
            ENV_MAX_WORKER_EXECUTE_TIME_MS,
            ENV_BLOCKED_THREAD_CHECK_INTERVAL_MS,
            ENV_WARNING_EXCEPTION_TIME_MS,
            ENV_BLOCKED_THREAD_CHECKER_ENABLED,
            ENV_THREAD_NAME_PREFIX,
        ] {
            std::env::remove_var(var);
        }
    }

    // --- defaults and validation ---

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().expect("defaults must validate");
        assert!(config.event_loop_size >= 1);
        assert_eq!(config.worker_pool_size, 20);
        assert_eq!(config.max_execute_time, Duration::from_millis(2000));
        assert_eq!(config.max_worker_execute_time, Duration::from_secs(60));
        assert_eq!(
            config.blocked_thread_check_interval,
            Duration::from_millis(1000)
        );
        assert_eq!(config.warning_exception_time, Duration::from_millis(5000));
        assert!(config.blocked_thread_checker_enabled);
        assert_eq!(config.thread_name_prefix, "carousel");
    }

    #[test]
    fn zero_event_loops_rejected() {
        let config = SchedulerConfig {
            event_loop_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEventLoopSize { got: 0 })
        ));
    }

    #[test]
    fn zero_workers_rejected() {
        let config = SchedulerConfig {
            worker_pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerPoolSize { got: 0 })
        ));
    }

    #[test]
    fn zero_durations_rejected() {
        for mutate in [
            (|c: &mut SchedulerConfig| c.max_execute_time = Duration::ZERO)
                as fn(&mut SchedulerConfig),
            |c| c.max_worker_execute_time = Duration::ZERO,
            |c| c.blocked_thread_check_interval = Duration::ZERO,
            |c| c.warning_exception_time = Duration::ZERO,
        ] {
            let mut config = SchedulerConfig::default();
            mutate(&mut config);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::ZeroDuration { .. })
            ));
        }
    }

    #[test]
    fn empty_prefix_rejected() {
        let config = SchedulerConfig {
            thread_name_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyThreadNamePrefix)
        ));
    }

    // --- parse helpers ---

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
    }

    #[test]
    fn parse_usize_invalid() {
        assert!(super::parse_usize("TEST", "abc").is_err());
        assert!(super::parse_usize("TEST", "-1").is_err());
        assert!(super::parse_usize("TEST", "").is_err());
    }

    #[test]
    fn parse_duration_ms_valid() {
        assert_eq!(
            super::parse_duration_ms("TEST", "1500").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn parse_duration_ms_invalid() {
        assert!(super::parse_duration_ms("TEST", "1.5s").is_err());
    }

    #[test]
    fn parse_bool_all_truthy() {
        for val in &["true", "1", "yes", "on", "TRUE", "Yes", "ON"] {
            assert!(
                super::parse_bool("TEST", val).unwrap(),
                "expected true for {val}"
            );
        }
    }

    #[test]
    fn parse_bool_all_falsy() {
        for val in &["false", "0", "no", "off", "FALSE", "No", "OFF"] {
            assert!(
                !super::parse_bool("TEST", val).unwrap(),
                "expected false for {val}"
            );
        }
    }

    #[test]
    fn parse_bool_invalid() {
        assert!(super::parse_bool("TEST", "maybe").is_err());
    }

    // --- apply_env_overrides ---

    #[test]
    fn env_overrides_pool_sizes() {
        with_envs(
            &[(ENV_EVENT_LOOP_SIZE, "6"), (ENV_WORKER_POOL_SIZE, "40")],
            || {
                let mut config = SchedulerConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.event_loop_size, 6);
                assert_eq!(config.worker_pool_size, 40);
            },
        );
    }

    #[test]
    fn env_overrides_durations() {
        with_envs(
            &[
                (ENV_MAX_EXECUTE_TIME_MS, "250"),
                (ENV_BLOCKED_THREAD_CHECK_INTERVAL_MS, "50"),
                (ENV_WARNING_EXCEPTION_TIME_MS, "750"),
            ],
            || {
                let mut config = SchedulerConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.max_execute_time, Duration::from_millis(250));
                assert_eq!(
                    config.blocked_thread_check_interval,
                    Duration::from_millis(50)
                );
                assert_eq!(config.warning_exception_time, Duration::from_millis(750));
            },
        );
    }

    #[test]
    fn env_overrides_checker_toggle_and_prefix() {
        with_envs(
            &[
                (ENV_BLOCKED_THREAD_CHECKER_ENABLED, "off"),
                (ENV_THREAD_NAME_PREFIX, "myapp"),
            ],
            || {
                let mut config = SchedulerConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert!(!config.blocked_thread_checker_enabled);
                assert_eq!(config.thread_name_prefix, "myapp");
            },
        );
    }

    #[test]
    fn env_overrides_unset_vars_leave_defaults() {
        with_clean_env(|| {
            let defaults = SchedulerConfig::default();
            let mut config = SchedulerConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.event_loop_size, defaults.event_loop_size);
            assert_eq!(config.worker_pool_size, defaults.worker_pool_size);
            assert_eq!(config.max_execute_time, defaults.max_execute_time);
        });
    }

    #[test]
    fn env_overrides_invalid_value_returns_error() {
        with_envs(&[(ENV_EVENT_LOOP_SIZE, "not_a_number")], || {
            let mut config = SchedulerConfig::default();
            let result = apply_env_overrides(&mut config);
            let msg = result.unwrap_err().to_string();
            assert!(
                msg.contains(ENV_EVENT_LOOP_SIZE),
                "error should mention var name: {msg}"
            );
            assert!(
                msg.contains("not_a_number"),
                "error should mention bad value: {msg}"
            );
        });
    }
}
