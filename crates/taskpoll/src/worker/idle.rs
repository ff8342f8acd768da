//! Idle poll backoff
//!
//! Each poller execution slows down after consecutive empty polls and snaps
//! back to the minimum interval as soon as a task shows up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::WorkerError;

/// Idle polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdlePollConfig {
    /// Wait after the first empty poll
    #[serde(with = "crate::duration_millis")]
    pub min_interval: Duration,

    /// Longest wait between empty polls
    #[serde(with = "crate::duration_millis")]
    pub max_interval: Duration,

    /// Growth factor per consecutive empty poll
    pub backoff_multiplier: f64,
}

impl Default for IdlePollConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl IdlePollConfig {
    /// Create a new idle polling configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum idle interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum idle interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(WorkerError::InvalidConfig(
                "idle_poll.backoff_multiplier must be a finite number of at least 1.0".into(),
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(WorkerError::InvalidConfig(
                "idle_poll.min_interval must not exceed max_interval".into(),
            ));
        }
        Ok(())
    }
}

/// Per-poller idle interval state
#[derive(Debug)]
pub(crate) struct IdleBackoff {
    config: IdlePollConfig,
    next: Option<Duration>,
}

impl IdleBackoff {
    pub(crate) fn new(config: IdlePollConfig) -> Self {
        Self { config, next: None }
    }

    /// Interval to wait after another empty poll
    pub(crate) fn on_empty(&mut self) -> Duration {
        let interval = match self.next {
            None => self.config.min_interval,
            Some(previous) => {
                Duration::try_from_secs_f64(previous.as_secs_f64() * self.config.backoff_multiplier)
                    .map(|interval| interval.min(self.config.max_interval))
                    .unwrap_or(self.config.max_interval)
            }
        };
        self.next = Some(interval);
        interval
    }

    /// A task was found
    pub(crate) fn reset(&mut self) {
        self.next = None;
    }
}
