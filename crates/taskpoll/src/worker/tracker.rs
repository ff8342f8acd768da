//! Poller count tracking and autoscaling
//!
//! The poll loop reports one [`PollSignal`] per iteration. A tracker turns
//! those signals into a target poller count, which the worker applies to the
//! poller permit pool.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Outcome of one poll iteration, as seen by a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSignal {
    /// The poll returned a task
    Task,
    /// The poll succeeded with nothing to do
    Empty,
    /// The poll failed
    Failed,
}

impl PollSignal {
    fn yielded_work(self) -> bool {
        matches!(self, Self::Task)
    }
}

/// Feedback sink for poll outcomes
pub trait PollerTracker: Send + Sync {
    /// Record the outcome of one poll iteration
    fn record(&self, signal: PollSignal);

    /// Desired number of concurrently active pollers
    ///
    /// `None` means the tracker has no opinion and the pool keeps its size.
    fn target_pollers(&self) -> Option<usize>;

    /// Upper bound on the target, if the tracker scales at all
    fn max_pollers(&self) -> Option<usize> {
        None
    }
}

/// Tracker for fixed-size poller pools
///
/// Accepts every signal and never asks for a resize.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPollerTracker;

impl NoopPollerTracker {
    /// Create a no-op tracker
    pub fn new() -> Self {
        Self
    }
}

impl PollerTracker for NoopPollerTracker {
    fn record(&self, _signal: PollSignal) {}

    fn target_pollers(&self) -> Option<usize> {
        None
    }
}

/// Autoscaling configuration
///
/// # Example
///
/// ```
/// use taskpoll::worker::AutoscaleConfig;
///
/// let config = AutoscaleConfig::default()
///     .with_max_pollers(16)
///     .with_high_watermark(0.9)
///     .with_low_watermark(0.1);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscaleConfig {
    /// Floor for the poller count
    pub min_pollers: usize,

    /// Ceiling for the poller count
    pub max_pollers: usize,

    /// Poller count before any signal has been seen
    pub initial_pollers: usize,

    /// Scale up when the share of iterations that yielded work exceeds this
    pub high_watermark: f64,

    /// Scale down when the share of iterations that yielded work falls below this
    pub low_watermark: f64,

    /// Number of recent iterations the utilization is computed over
    pub sample_window: usize,

    /// Minimum time between two adjustments
    #[serde(with = "crate::duration_millis")]
    pub evaluation_window: Duration,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            min_pollers: 1,
            max_pollers: 8,
            initial_pollers: 2,
            high_watermark: 0.8,
            low_watermark: 0.2,
            sample_window: 20,
            evaluation_window: Duration::from_secs(10),
        }
    }
}

impl AutoscaleConfig {
    /// Create a new autoscaling configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum poller count
    pub fn with_min_pollers(mut self, min: usize) -> Self {
        self.min_pollers = min;
        self
    }

    /// Set the maximum poller count
    pub fn with_max_pollers(mut self, max: usize) -> Self {
        self.max_pollers = max;
        self
    }

    /// Set the initial poller count
    pub fn with_initial_pollers(mut self, initial: usize) -> Self {
        self.initial_pollers = initial;
        self
    }

    /// Set the scale-up watermark
    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    /// Set the scale-down watermark
    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    /// Set the number of samples utilization is computed over
    pub fn with_sample_window(mut self, samples: usize) -> Self {
        self.sample_window = samples.max(1);
        self
    }

    /// Set the minimum time between adjustments
    pub fn with_evaluation_window(mut self, window: Duration) -> Self {
        self.evaluation_window = window;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AutoscaleError> {
        if self.min_pollers == 0 {
            return Err(AutoscaleError::InvalidConfig(
                "min_pollers must be at least 1".into(),
            ));
        }
        if self.min_pollers > self.max_pollers {
            return Err(AutoscaleError::InvalidConfig(
                "min_pollers must not exceed max_pollers".into(),
            ));
        }
        if !(self.min_pollers..=self.max_pollers).contains(&self.initial_pollers) {
            return Err(AutoscaleError::InvalidConfig(
                "initial_pollers must be within [min_pollers, max_pollers]".into(),
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(AutoscaleError::InvalidConfig(
                "low_watermark must be less than high_watermark".into(),
            ));
        }
        Ok(())
    }
}

/// Autoscaling errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AutoscaleError {
    /// Invalid configuration
    #[error("invalid autoscale configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug)]
struct ScalerState {
    samples: VecDeque<bool>,
    current: usize,
    last_adjusted: Option<Instant>,
}

/// Utilization-driven poller tracker
///
/// Keeps a rolling window of recent iterations. When the window is full and
/// the share that yielded a task crosses a watermark, the target moves by
/// one, at most once per evaluation window. The window is cleared after each
/// adjustment so the next decision only sees samples taken at the new size.
#[derive(Debug)]
pub struct AutoScaler {
    config: AutoscaleConfig,
    state: Mutex<ScalerState>,
}

impl AutoScaler {
    /// Create an autoscaler
    pub fn new(config: AutoscaleConfig) -> Result<Self, AutoscaleError> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(ScalerState {
                samples: VecDeque::with_capacity(config.sample_window),
                current: config.initial_pollers,
                last_adjusted: None,
            }),
            config,
        })
    }

    /// Share of recent iterations that yielded a task
    pub fn utilization(&self) -> f64 {
        let state = self.state.lock();
        utilization(&state.samples)
    }

    /// Configuration in use
    pub fn config(&self) -> &AutoscaleConfig {
        &self.config
    }
}

fn utilization(samples: &VecDeque<bool>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().filter(|worked| **worked).count() as f64 / samples.len() as f64
}

impl PollerTracker for AutoScaler {
    fn record(&self, signal: PollSignal) {
        let mut state = self.state.lock();

        if state.samples.len() >= self.config.sample_window {
            state.samples.pop_front();
        }
        state.samples.push_back(signal.yielded_work());

        if state.samples.len() < self.config.sample_window {
            return;
        }

        if let Some(last) = state.last_adjusted {
            if last.elapsed() < self.config.evaluation_window {
                return;
            }
        }

        let ratio = utilization(&state.samples);
        let previous = state.current;

        if ratio > self.config.high_watermark && state.current < self.config.max_pollers {
            state.current += 1;
        } else if ratio < self.config.low_watermark && state.current > self.config.min_pollers {
            state.current -= 1;
        } else {
            return;
        }

        state.last_adjusted = Some(Instant::now());
        state.samples.clear();
        debug!(
            utilization = ratio,
            from = previous,
            to = state.current,
            "Autoscaler adjusted poller target"
        );
    }

    fn target_pollers(&self) -> Option<usize> {
        Some(self.state.lock().current)
    }

    fn max_pollers(&self) -> Option<usize> {
        Some(self.config.max_pollers)
    }
}
