//! Poll backoff driven by a cancellable limiter context
//!
//! A retriable poll failure cancels the current [`LimiterContext`]. While it
//! stays cancelled every poller permit acquisition against it fails fast, so
//! no new polls are issued. Once the cooldown has elapsed the next caller of
//! [`BackoffController::current`] installs a fresh context. Stale clones of
//! the old context stay cancelled forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::PollError;
use crate::worker::WorkerState;

/// Logged when poller permit acquisition is being throttled
pub const THROTTLE_WARNING: &str = "poller permit acquire error";

/// Logged once per non-retriable poll failure
pub const CONTINUE_POLLING_NOTICE: &str =
    "Worker received non-retriable error from PollTask; continue polling.";

/// Cooldown policy applied after retriable poll failures
///
/// # Example
///
/// ```
/// use taskpoll::reliability::BackoffConfig;
/// use std::time::Duration;
///
/// let config = BackoffConfig::default()
///     .with_initial_cooldown(Duration::from_millis(500))
///     .with_max_cooldown(Duration::from_secs(10))
///     .with_jitter(0.0);
///
/// assert_eq!(config.cooldown_for(1), Duration::from_millis(500));
/// assert_eq!(config.cooldown_for(2), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// Cooldown after the first retriable failure in a streak
    #[serde(with = "crate::duration_millis")]
    pub initial_cooldown: Duration,

    /// Upper bound for the cooldown
    #[serde(with = "crate::duration_millis")]
    pub max_cooldown: Duration,

    /// Growth factor per consecutive failure
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) applied to each cooldown
    pub jitter: f64,

    /// How long a throttled poller sleeps before checking the limiter again
    #[serde(with = "crate::duration_millis")]
    pub retry_interval: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_cooldown: Duration::from_secs(1),
            max_cooldown: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl BackoffConfig {
    /// Create a new backoff configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first cooldown of a failure streak
    pub fn with_initial_cooldown(mut self, cooldown: Duration) -> Self {
        self.initial_cooldown = cooldown;
        self
    }

    /// Set the maximum cooldown
    pub fn with_max_cooldown(mut self, cooldown: Duration) -> Self {
        self.max_cooldown = cooldown;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the throttled retry interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Cooldown for the `failures`-th consecutive retriable failure (1-based)
    pub fn cooldown_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_cooldown.as_secs_f64()
            * self.backoff_coefficient.powi(failures as i32 - 1);
        let capped = base.min(self.max_cooldown.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_cooldown)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BackoffError> {
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(BackoffError::InvalidConfig(
                "backoff_coefficient must be a finite number of at least 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(BackoffError::InvalidConfig(
                "jitter must be within [0.0, 1.0]".into(),
            ));
        }
        if self.initial_cooldown > self.max_cooldown {
            return Err(BackoffError::InvalidConfig(
                "initial_cooldown must not exceed max_cooldown".into(),
            ));
        }
        Ok(())
    }
}

/// Backoff errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackoffError {
    /// Invalid configuration
    #[error("invalid backoff configuration: {0}")]
    InvalidConfig(String),
}

/// Cancellable token gating poller permit acquisition
///
/// Cheap to clone. Clones share cancellation state, the recorded cause and
/// whether the throttling has been reported yet.
#[derive(Debug, Clone)]
pub struct LimiterContext {
    token: CancellationToken,
    cause: Arc<OnceLock<String>>,
    reported: Arc<AtomicBool>,
}

impl LimiterContext {
    fn new(root: &CancellationToken) -> Self {
        Self {
            token: root.child_token(),
            cause: Arc::new(OnceLock::new()),
            reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token to pass to permit acquisition
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this context has been cancelled (directly or via the root)
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded by the failure that cancelled this context
    pub fn cause(&self) -> Option<&str> {
        self.cause.get().map(String::as_str)
    }

    /// Claim the single throttling report for this context
    ///
    /// Returns `true` for the first caller only.
    pub fn mark_reported(&self) -> bool {
        !self.reported.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` only for the call that actually cancelled the context
    fn cancel(&self, cause: String) -> bool {
        if self.token.is_cancelled() || self.cause.set(cause).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }
}

#[derive(Debug)]
struct LimiterSlot {
    current: LimiterContext,
    cancelled_at: Option<Instant>,
    cooldown: Duration,
    consecutive_failures: u32,
}

/// Owns the current limiter context and reacts to poll failures
#[derive(Debug)]
pub struct BackoffController {
    config: BackoffConfig,
    identity: String,
    root: CancellationToken,
    slot: Mutex<LimiterSlot>,
}

impl BackoffController {
    /// Create a controller whose limiter contexts are children of `root`
    pub fn new(config: BackoffConfig, identity: impl Into<String>, root: CancellationToken) -> Self {
        let current = LimiterContext::new(&root);
        Self {
            config,
            identity: identity.into(),
            root,
            slot: Mutex::new(LimiterSlot {
                current,
                cancelled_at: None,
                cooldown: Duration::ZERO,
                consecutive_failures: 0,
            }),
        }
    }

    /// The limiter context pollers should acquire against right now
    ///
    /// Installs a replacement when the current context was cancelled by a
    /// failure and its cooldown has elapsed. Never replaces a context that
    /// was cancelled by the root.
    pub fn current(&self) -> LimiterContext {
        let mut slot = self.slot.lock();

        if let Some(cancelled_at) = slot.cancelled_at {
            if !self.root.is_cancelled() && cancelled_at.elapsed() >= slot.cooldown {
                slot.current = LimiterContext::new(&self.root);
                slot.cancelled_at = None;
                debug!(identity = %self.identity, "Limiter context reinstated after cooldown");
            }
        }

        slot.current.clone()
    }

    /// Cancel the current limiter context with `cause`
    ///
    /// Returns `false` if it was already cancelled.
    pub fn cancel(&self, cause: impl Into<String>) -> bool {
        self.cancel_current(cause.into()).is_some()
    }

    fn cancel_current(&self, cause: String) -> Option<LimiterContext> {
        let mut slot = self.slot.lock();
        if !slot.current.cancel(cause) {
            return None;
        }

        slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
        slot.cooldown = self.config.cooldown_for(slot.consecutive_failures);
        slot.cancelled_at = Some(Instant::now());
        Some(slot.current.clone())
    }

    /// Handle a retriable poll failure
    ///
    /// Cancels the limiter context. The throttling warning is emitted at
    /// most once per cancelled context, and never once the worker is
    /// stopping.
    pub fn on_retriable_failure(&self, error: &PollError, state: WorkerState) -> bool {
        let Some(cancelled) = self.cancel_current(error.to_string()) else {
            debug!(identity = %self.identity, error = %error, "Poll failed while already throttled");
            return false;
        };

        if state.is_stopping() || self.root.is_cancelled() || !cancelled.mark_reported() {
            return true;
        }

        warn!(
            identity = %self.identity,
            error = %error,
            error_kind = error.kind(),
            cooldown_ms = self.cooldown().as_millis() as u64,
            consecutive_failures = self.consecutive_failures(),
            "{}",
            THROTTLE_WARNING
        );
        true
    }

    /// Handle a non-retriable poll failure
    ///
    /// Leaves the limiter context untouched.
    pub fn on_non_retriable_failure(&self, error: &PollError) {
        info!(
            identity = %self.identity,
            error = %error,
            error_kind = error.kind(),
            "{}",
            CONTINUE_POLLING_NOTICE
        );
    }

    /// Reset the failure streak after a successful poll
    pub fn on_success(&self) {
        self.slot.lock().consecutive_failures = 0;
    }

    /// How long a throttled poller should wait before trying again
    ///
    /// Never longer than the configured retry interval, and shorter when the
    /// cooldown is about to expire.
    pub fn retry_delay(&self) -> Duration {
        let slot = self.slot.lock();
        match slot.cancelled_at {
            Some(cancelled_at) => slot
                .cooldown
                .saturating_sub(cancelled_at.elapsed())
                .min(self.config.retry_interval),
            None => self.config.retry_interval,
        }
    }

    /// Consecutive retriable failures in the current streak
    pub fn consecutive_failures(&self) -> u32 {
        self.slot.lock().consecutive_failures
    }

    /// Cooldown of the most recent cancellation
    pub fn cooldown(&self) -> Duration {
        self.slot.lock().cooldown
    }

    /// Whether a failure-triggered cooldown is in effect
    pub fn is_throttled(&self) -> bool {
        self.slot.lock().cancelled_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(root: &CancellationToken) -> BackoffController {
        let config = BackoffConfig::new()
            .with_initial_cooldown(Duration::from_millis(100))
            .with_max_cooldown(Duration::from_secs(1))
            .with_jitter(0.0)
            .with_retry_interval(Duration::from_millis(30));
        BackoffController::new(config, "test-identity", root.clone())
    }

    #[test]
    fn test_default_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_cooldown, Duration::from_secs(1));
        assert_eq!(config.max_cooldown, Duration::from_secs(60));
        assert_eq!(config.backoff_coefficient, 2.0);
        assert_eq!(config.retry_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_cooldown_growth_and_cap() {
        let config = BackoffConfig::new()
            .with_initial_cooldown(Duration::from_secs(1))
            .with_max_cooldown(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(config.cooldown_for(0), Duration::ZERO);
        assert_eq!(config.cooldown_for(1), Duration::from_secs(1));
        assert_eq!(config.cooldown_for(2), Duration::from_secs(2));
        assert_eq!(config.cooldown_for(3), Duration::from_secs(4));
        assert_eq!(config.cooldown_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_cooldown_jitter_stays_in_range() {
        let config = BackoffConfig::new()
            .with_initial_cooldown(Duration::from_secs(1))
            .with_jitter(0.2);

        for _ in 0..100 {
            let cooldown = config.cooldown_for(1).as_secs_f64();
            assert!((0.8..=1.2).contains(&cooldown));
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(BackoffConfig::default().validate().is_ok());

        let negative = BackoffConfig {
            backoff_coefficient: -2.0,
            ..BackoffConfig::default()
        };
        assert!(negative.validate().is_err());

        let nan = BackoffConfig {
            backoff_coefficient: f64::NAN,
            ..BackoffConfig::default()
        };
        assert!(nan.validate().is_err());

        let wide_jitter = BackoffConfig {
            jitter: 1.5,
            ..BackoffConfig::default()
        };
        assert!(wide_jitter.validate().is_err());

        let inverted = BackoffConfig::new()
            .with_initial_cooldown(Duration::from_secs(10))
            .with_max_cooldown(Duration::from_secs(1));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_unvalidated_coefficient_does_not_panic() {
        let config = BackoffConfig {
            backoff_coefficient: -2.0,
            jitter: 0.0,
            ..BackoffConfig::default()
        };
        assert_eq!(config.cooldown_for(2), config.max_cooldown);
    }

    #[test]
    fn test_serialization() {
        let config = BackoffConfig::default().with_retry_interval(Duration::from_millis(250));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"retry_interval\":250"));
        let parsed: BackoffConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_reinstate_after_cooldown() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        let before = backoff.current();
        assert!(!before.is_cancelled());

        assert!(backoff.cancel("connection reset"));
        assert!(before.is_cancelled());
        assert_eq!(before.cause(), Some("connection reset"));
        assert!(backoff.is_throttled());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(backoff.current().is_cancelled());

        tokio::time::advance(Duration::from_millis(60)).await;
        let after = backoff.current();
        assert!(!after.is_cancelled());
        assert!(after.cause().is_none());
        assert!(!backoff.is_throttled());

        // stale references keep observing the cancellation
        assert!(before.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_cancel_is_noop() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        assert!(backoff.cancel("first"));
        assert!(!backoff.cancel("second"));
        assert_eq!(backoff.consecutive_failures(), 1);
        assert_eq!(backoff.current().cause(), Some("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streak_escalates_and_resets() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        backoff.on_retriable_failure(&PollError::Timeout, WorkerState::Running);
        assert_eq!(backoff.cooldown(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!backoff.current().is_cancelled());

        backoff.on_retriable_failure(&PollError::Timeout, WorkerState::Running);
        assert_eq!(backoff.consecutive_failures(), 2);
        assert_eq!(backoff.cooldown(), Duration::from_millis(200));

        backoff.on_success();
        assert_eq!(backoff.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_is_bounded() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        assert_eq!(backoff.retry_delay(), Duration::from_millis(30));

        backoff.cancel("boom");
        assert_eq!(backoff.retry_delay(), Duration::from_millis(30));

        tokio::time::advance(Duration::from_millis(90)).await;
        assert_eq!(backoff.retry_delay(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_cancellation_is_never_undone() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        backoff.cancel("boom");
        root.cancel();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(backoff.current().is_cancelled());
    }

    #[test]
    fn test_root_cancellation_propagates_to_limiter() {
        let root = CancellationToken::new();
        let backoff = controller(&root);
        let limiter = backoff.current();

        root.cancel();
        assert!(limiter.is_cancelled());
        assert!(limiter.cause().is_none());
        assert!(!backoff.cancel("late failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_reported_once() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        assert!(backoff.on_retriable_failure(&PollError::Timeout, WorkerState::Running));
        let limiter = backoff.current();
        assert!(!limiter.mark_reported());

        tokio::time::advance(Duration::from_millis(100)).await;
        let fresh = backoff.current();
        assert!(fresh.mark_reported());
        assert!(!fresh.mark_reported());
    }

    #[test]
    fn test_report_not_claimed_while_stopping() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        backoff.on_retriable_failure(&PollError::Timeout, WorkerState::Stopping);
        assert!(backoff.current().mark_reported());
    }

    #[test]
    fn test_non_retriable_failure_leaves_limiter_alone() {
        let root = CancellationToken::new();
        let backoff = controller(&root);

        backoff.on_non_retriable_failure(&PollError::bad_request("bad"));
        assert!(!backoff.current().is_cancelled());
        assert_eq!(backoff.consecutive_failures(), 0);
    }
}
