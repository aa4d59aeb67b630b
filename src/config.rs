//! Scheduler configuration.
//!
//! Configuration is layered: programmatic values take precedence, then
//! environment variables, then defaults. Validation happens once, at
//! scheduler construction, and produces a typed [`ConfigError`].

use core::fmt;
use std::thread;

/// Environment variable consulted by [`SchedulerConfig::from_env`] for the
/// concurrency hint.
pub const CONCURRENCY_ENV: &str = "TASKMILL_CONCURRENCY";

/// Configuration for a [`Scheduler`](crate::sched::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Hint for how many threads will run the scheduler concurrently.
    ///
    /// The engine only consumes one bit of this hint: a hint of exactly 1
    /// enables the single-thread reentrancy optimization (reentrant posts
    /// go to a thread-private queue and skip the lock/wake cycle). Any
    /// other value selects the fully concurrent configuration.
    pub concurrency_hint: usize,
}

impl SchedulerConfig {
    /// Configuration for a scheduler driven by exactly one thread.
    #[must_use]
    pub const fn single_thread() -> Self {
        Self {
            concurrency_hint: 1,
        }
    }

    /// Configuration for a scheduler driven by `threads` threads.
    #[must_use]
    pub const fn multi_thread(threads: usize) -> Self {
        Self {
            concurrency_hint: threads,
        }
    }

    /// Builds a configuration from the environment, falling back to the
    /// default for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if `TASKMILL_CONCURRENCY` is set
    /// but does not parse as a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(CONCURRENCY_ENV) {
            let hint = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnv(CONCURRENCY_ENV, raw.clone()))?;
            if hint == 0 {
                return Err(ConfigError::InvalidEnv(CONCURRENCY_ENV, raw));
            }
            config.concurrency_hint = hint;
        }
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConcurrency` for a zero hint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_hint == 0 {
            return Err(ConfigError::InvalidConcurrency(self.concurrency_hint));
        }
        Ok(())
    }

    /// Returns true if this configuration selects the single-thread
    /// reentrancy optimization.
    #[must_use]
    pub const fn is_single_thread(&self) -> bool {
        self.concurrency_hint == 1
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_hint: thread::available_parallelism().map_or(1, usize::from),
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The concurrency hint is not a positive integer.
    InvalidConcurrency(usize),
    /// An environment variable was set to an unparseable value.
    InvalidEnv(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConcurrency(hint) => {
                write!(f, "concurrency hint must be positive, got {hint}")
            }
            Self::InvalidEnv(var, raw) => {
                write!(f, "invalid value for {var}: {raw:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
