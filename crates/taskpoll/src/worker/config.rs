//! Worker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::idle::IdlePollConfig;
use super::WorkerError;
use crate::reliability::BackoffConfig;

/// Worker configuration
///
/// Captured once at construction. The task handler and poller tracker are
/// passed to [`BaseWorker::new`](super::BaseWorker::new) alongside it.
///
/// # Example
///
/// ```
/// use taskpoll::worker::WorkerConfig;
/// use std::time::Duration;
///
/// let config = WorkerConfig::new()
///     .with_identity("orders-worker-1")
///     .with_max_concurrent_tasks(20)
///     .with_poller_count(4)
///     .with_shutdown_timeout(Duration::from_secs(10));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Opaque identity attached to logs and metrics
    pub identity: String,

    /// Maximum tasks processed at the same time
    pub max_concurrent_tasks: usize,

    /// Poller count used when the tracker does not autoscale
    pub poller_count: usize,

    /// Backoff applied after retriable poll failures
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Backoff applied after empty polls
    #[serde(default)]
    pub idle_poll: IdlePollConfig,

    /// How long `stop` waits for pollers and in-flight tasks
    #[serde(with = "crate::duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            identity: format!("worker-{}", Uuid::now_v7()),
            max_concurrent_tasks: 10,
            poller_count: 2,
            backoff: BackoffConfig::default(),
            idle_poll: IdlePollConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create a new worker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TASKPOLL_IDENTITY`: Worker identity (default: generated)
    /// - `TASKPOLL_MAX_CONCURRENT_TASKS`: Task concurrency cap (default: 10)
    /// - `TASKPOLL_POLLER_COUNT`: Fixed poller count (default: 2)
    /// - `TASKPOLL_SHUTDOWN_TIMEOUT_MS`: Graceful shutdown timeout (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            identity: std::env::var("TASKPOLL_IDENTITY").unwrap_or(defaults.identity),
            max_concurrent_tasks: env_parse("TASKPOLL_MAX_CONCURRENT_TASKS")
                .unwrap_or(defaults.max_concurrent_tasks),
            poller_count: env_parse("TASKPOLL_POLLER_COUNT").unwrap_or(defaults.poller_count),
            shutdown_timeout: env_parse("TASKPOLL_SHUTDOWN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
            ..defaults
        }
    }

    /// Set the worker identity
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Set the task concurrency cap
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the fixed poller count
    pub fn with_poller_count(mut self, count: usize) -> Self {
        self.poller_count = count;
        self
    }

    /// Set backoff configuration
    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Set idle polling configuration
    pub fn with_idle_poll(mut self, config: IdlePollConfig) -> Self {
        self.idle_poll = config;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.max_concurrent_tasks == 0 {
            return Err(WorkerError::InvalidConfig(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.poller_count == 0 {
            return Err(WorkerError::InvalidConfig(
                "poller_count must be at least 1".into(),
            ));
        }
        self.backoff
            .validate()
            .map_err(|e| WorkerError::InvalidConfig(e.to_string()))?;
        self.idle_poll.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
