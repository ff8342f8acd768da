//! Base worker: lifecycle and poll loop
//!
//! Owns both permit pools, the backoff controller and the poller executions
//! for one [`TaskHandler`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::config::WorkerConfig;
use super::idle::IdleBackoff;
use super::state::WorkerState;
use super::tracker::{NoopPollerTracker, PollSignal, PollerTracker};
use crate::concurrency::{Permit, PermitPool};
use crate::handler::TaskHandler;
use crate::metrics;
use crate::reliability::{BackoffController, PollOutcome, Retryability, THROTTLE_WARNING};

/// Worker lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Configuration rejected by validation
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called outside a tokio runtime
    #[error("no tokio runtime available to spawn pollers")]
    NoRuntime,

    /// The worker has already been stopped
    #[error("worker has been stopped")]
    Stopped,

    /// Pollers or in-flight tasks did not finish in time
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Result of a single poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollIteration {
    /// A task was polled and handed to a processing task
    Dispatched,
    /// The handler had nothing to do
    Empty,
    /// The poll failed; backoff has been applied if the error was retriable
    Failed,
    /// Poller permit acquisition was rejected by the backoff limiter
    Throttled,
    /// The worker is shutting down
    Exit,
}

struct WorkerShared<H> {
    config: WorkerConfig,
    handler: Arc<H>,
    tracker: Arc<dyn PollerTracker>,
    state: RwLock<WorkerState>,
    root: CancellationToken,
    processing_cancel: CancellationToken,
    backoff: BackoffController,
    task_permits: PermitPool,
    poller_permits: PermitPool,
    pollers: TaskTracker,
    processing: TaskTracker,
    executions: usize,
}

/// Polls a [`TaskHandler`] from several concurrent poller executions and
/// dispatches every returned task to its own processing task
///
/// Cheap to clone; clones share the same worker.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use taskpoll::handler::InMemoryTaskQueue;
/// use taskpoll::worker::{BaseWorker, NoopPollerTracker, WorkerConfig};
///
/// # tokio_test::block_on(async {
/// let queue = InMemoryTaskQueue::new(Duration::from_millis(50), |order: u64| async move {
///     tracing::info!(order, "processing");
///     Ok(())
/// });
/// queue.extend(1..=3);
///
/// let config = WorkerConfig::new().with_identity("orders").with_poller_count(1);
/// let worker = BaseWorker::new(config, queue, Arc::new(NoopPollerTracker::new())).unwrap();
///
/// worker.start().unwrap();
/// worker.stop().await.unwrap();
/// # });
/// ```
pub struct BaseWorker<H> {
    shared: Arc<WorkerShared<H>>,
}

impl<H> Clone for BaseWorker<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: TaskHandler> BaseWorker<H> {
    /// Create a worker in the `Created` state
    pub fn new(
        config: WorkerConfig,
        handler: H,
        tracker: Arc<dyn PollerTracker>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;

        let executions = tracker
            .max_pollers()
            .unwrap_or(config.poller_count)
            .max(1);
        let initial_pollers = tracker
            .target_pollers()
            .unwrap_or(config.poller_count)
            .clamp(1, executions);

        let root = CancellationToken::new();
        let backoff =
            BackoffController::new(config.backoff.clone(), config.identity.clone(), root.clone());

        Ok(Self {
            shared: Arc::new(WorkerShared {
                task_permits: PermitPool::new("tasks", config.max_concurrent_tasks),
                poller_permits: PermitPool::new("pollers", initial_pollers),
                handler: Arc::new(handler),
                tracker,
                state: RwLock::new(WorkerState::Created),
                root,
                processing_cancel: CancellationToken::new(),
                backoff,
                pollers: TaskTracker::new(),
                processing: TaskTracker::new(),
                executions,
                config,
            }),
        })
    }

    /// Create a worker with a fixed poller count
    pub fn with_fixed_pollers(config: WorkerConfig, handler: H) -> Result<Self, WorkerError> {
        Self::new(config, handler, Arc::new(NoopPollerTracker::new()))
    }

    /// Spawn the poller executions
    ///
    /// Idempotent while running. Returns [`WorkerError::Stopped`] once a stop
    /// has been requested.
    #[instrument(skip(self), fields(identity = %self.shared.config.identity))]
    pub fn start(&self) -> Result<(), WorkerError> {
        let runtime = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;

        {
            let mut state = self.shared.state.write();
            match *state {
                WorkerState::Created => *state = WorkerState::Running,
                WorkerState::Running => return Ok(()),
                WorkerState::Stopping | WorkerState::Stopped => return Err(WorkerError::Stopped),
            }
        }

        info!(
            identity = %self.shared.config.identity,
            pollers = self.shared.executions,
            active_pollers = self.shared.poller_permits.capacity(),
            max_concurrent_tasks = self.shared.config.max_concurrent_tasks,
            "Starting worker"
        );

        for poller in 0..self.shared.executions {
            let worker = self.clone();
            self.shared
                .pollers
                .spawn_on(async move { worker.run_poller(poller).await }, &runtime);
        }

        Ok(())
    }

    /// Stop polling and wait for pollers and in-flight tasks
    ///
    /// Idempotent: a second call returns immediately. If the shutdown timeout
    /// expires, in-flight processing is cancelled, the worker still ends up
    /// `Stopped` and [`WorkerError::ShutdownTimeout`] is returned.
    #[instrument(skip(self), fields(identity = %self.shared.config.identity))]
    pub async fn stop(&self) -> Result<(), WorkerError> {
        {
            let mut state = self.shared.state.write();
            if state.is_stopping() {
                return Ok(());
            }
            *state = WorkerState::Stopping;
        }

        info!(identity = %self.shared.config.identity, "Initiating graceful shutdown");

        self.shared.root.cancel();
        self.shared.pollers.close();
        self.shared.processing.close();

        let timeout = self.shared.config.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, async {
            self.shared.pollers.wait().await;
            self.shared.processing.wait().await;
        })
        .await;

        let result = match drained {
            Ok(()) => {
                debug!("All pollers and tasks completed");
                Ok(())
            }
            Err(_) => {
                warn!(
                    identity = %self.shared.config.identity,
                    pollers = self.shared.pollers.len(),
                    in_flight = self.shared.processing.len(),
                    "Shutdown timeout reached, cancelling in-flight tasks"
                );
                self.shared.processing_cancel.cancel();
                Err(WorkerError::ShutdownTimeout(timeout))
            }
        };

        *self.shared.state.write() = WorkerState::Stopped;
        info!(identity = %self.shared.config.identity, "Worker stopped");
        result
    }

    /// Run one poll iteration
    ///
    /// This is what every poller execution runs in a loop. It may also be
    /// driven by hand, whether or not the worker has been started.
    pub async fn poll_task(&self) -> PollIteration {
        let shared = &self.shared;
        let identity = shared.config.identity.as_str();

        let limiter = shared.backoff.current();
        let poller_permit = match shared.poller_permits.acquire(limiter.token()).await {
            Ok(permit) => permit,
            Err(_) if self.is_shutting_down() => return PollIteration::Exit,
            Err(_) => {
                let cause = limiter.cause().unwrap_or("limiter cancelled");
                let retry_in_ms = shared.backoff.retry_delay().as_millis() as u64;
                if limiter.mark_reported() {
                    warn!(identity = %identity, cause, retry_in_ms, "{}", THROTTLE_WARNING);
                } else {
                    debug!(identity = %identity, cause, retry_in_ms, "Poll skipped while throttled");
                }
                metrics::record_throttled(identity);
                return PollIteration::Throttled;
            }
        };

        metrics::record_poll_attempt(identity);
        let result = tokio::select! {
            biased;
            _ = shared.root.cancelled() => return PollIteration::Exit,
            result = shared.handler.poll_task() => result,
        };

        let (signal, iteration) = match PollOutcome::from(result) {
            PollOutcome::Task(task) => {
                shared.backoff.on_success();
                metrics::record_poll_task(identity);

                let task_permit = match shared.task_permits.acquire(&shared.root).await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(identity = %identity, "Worker stopping, dropping polled task");
                        return PollIteration::Exit;
                    }
                };
                self.dispatch(task, task_permit);
                drop(poller_permit);
                (PollSignal::Task, PollIteration::Dispatched)
            }
            PollOutcome::Empty => {
                drop(poller_permit);
                shared.backoff.on_success();
                metrics::record_poll_empty(identity);
                (PollSignal::Empty, PollIteration::Empty)
            }
            PollOutcome::Retriable(error) => {
                drop(poller_permit);
                metrics::record_poll_failure(identity, Retryability::Retriable);
                shared.backoff.on_retriable_failure(&error, self.state());
                (PollSignal::Failed, PollIteration::Failed)
            }
            PollOutcome::NonRetriable(error) => {
                drop(poller_permit);
                metrics::record_poll_failure(identity, Retryability::NonRetriable);
                shared.backoff.on_non_retriable_failure(&error);
                (PollSignal::Failed, PollIteration::Failed)
            }
        };

        shared.tracker.record(signal);
        self.apply_poller_target();
        metrics::record_permit_usage(identity, &shared.poller_permits, &shared.task_permits);

        iteration
    }

    async fn run_poller(self, poller: usize) {
        let shared = &self.shared;
        let mut idle = IdleBackoff::new(shared.config.idle_poll.clone());
        debug!(identity = %shared.config.identity, poller, "Poller started");

        loop {
            let delay = match self.poll_task().await {
                PollIteration::Exit => break,
                PollIteration::Dispatched => {
                    idle.reset();
                    continue;
                }
                PollIteration::Failed => {
                    tokio::task::yield_now().await;
                    continue;
                }
                PollIteration::Empty => idle.on_empty(),
                PollIteration::Throttled => shared.backoff.retry_delay(),
            };

            tokio::select! {
                _ = shared.root.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(identity = %shared.config.identity, poller, "Poller exited");
    }

    fn dispatch(&self, task: H::Task, permit: Permit) {
        let handler = Arc::clone(&self.shared.handler);
        let cancel = self.shared.processing_cancel.clone();
        let identity = self.shared.config.identity.clone();

        self.shared.processing.spawn(async move {
            let _permit = permit;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(identity = %identity, "Task processing cancelled");
                    metrics::record_task_processed(&identity, "cancelled");
                }
                result = handler.process_task(task) => match result {
                    Ok(()) => {
                        debug!(identity = %identity, "Task processed");
                        metrics::record_task_processed(&identity, "success");
                    }
                    Err(error) => {
                        warn!(identity = %identity, error = %error, "Task processing failed");
                        metrics::record_task_processed(&identity, "failure");
                    }
                },
            }
        });
    }

    /// Resize the poller pool to the tracker's target
    fn apply_poller_target(&self) {
        let Some(target) = self.shared.tracker.target_pollers() else {
            return;
        };
        if self.is_shutting_down() {
            return;
        }

        let target = target.clamp(1, self.shared.executions);
        let current = self.shared.poller_permits.capacity();
        if target == current {
            return;
        }

        self.shared.poller_permits.resize(target);
        info!(
            identity = %self.shared.config.identity,
            from = current,
            to = target,
            "Poller pool resized"
        );
        metrics::record_poller_resize(&self.shared.config.identity, target);
    }

    fn is_shutting_down(&self) -> bool {
        self.state().is_stopping() || self.shared.root.is_cancelled()
    }

    /// Cancel the current limiter context as a retriable poll failure would
    ///
    /// Returns `false` if it was already cancelled.
    pub fn cancel_limiter(&self, cause: impl Into<String>) -> bool {
        self.shared.backoff.cancel(cause)
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.shared.state.read()
    }

    /// Worker identity
    pub fn identity(&self) -> &str {
        &self.shared.config.identity
    }

    /// Configuration in use
    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Pool capping concurrently processing tasks
    pub fn task_permits(&self) -> &PermitPool {
        &self.shared.task_permits
    }

    /// Pool capping concurrently active polls
    pub fn poller_permits(&self) -> &PermitPool {
        &self.shared.poller_permits
    }

    /// Backoff controller shared by all pollers
    pub fn backoff(&self) -> &BackoffController {
        &self.shared.backoff
    }

    /// Number of poller executions that have not exited yet
    pub fn active_pollers(&self) -> usize {
        self.shared.pollers.len()
    }

    /// Number of tasks still being processed
    pub fn in_flight(&self) -> usize {
        self.shared.processing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::InMemoryTaskQueue;
    use crate::worker::{AutoScaler, AutoscaleConfig};

    fn queue() -> InMemoryTaskQueue<u32> {
        InMemoryTaskQueue::new(Duration::from_millis(20), |_: u32| async { Ok(()) })
    }

    fn config() -> WorkerConfig {
        WorkerConfig::new()
            .with_identity("test-identity")
            .with_max_concurrent_tasks(2)
            .with_poller_count(2)
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BaseWorker::with_fixed_pollers(config().with_poller_count(0), queue());
        assert!(matches!(result, Err(WorkerError::InvalidConfig(_))));
    }

    #[test]
    fn test_start_outside_runtime() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();
        assert!(matches!(worker.start(), Err(WorkerError::NoRuntime)));
        assert_eq!(worker.state(), WorkerState::Created);
    }

    #[tokio::test]
    async fn test_start_twice_spawns_once() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();

        worker.start().unwrap();
        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert_eq!(worker.active_pollers(), 2);

        worker.stop().await.unwrap();
        assert_eq!(worker.active_pollers(), 0);
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();
        worker.start().unwrap();

        worker.stop().await.unwrap();
        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();

        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(matches!(worker.start(), Err(WorkerError::Stopped)));
        assert_eq!(worker.active_pollers(), 0);
    }

    #[tokio::test]
    async fn test_manual_poll_after_stop_exits() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();
        worker.start().unwrap();
        worker.stop().await.unwrap();

        assert_eq!(worker.poll_task().await, PollIteration::Exit);
    }

    #[tokio::test]
    async fn test_manual_poll_dispatches_task() {
        let queue = queue();
        queue.push(1);
        let worker = BaseWorker::with_fixed_pollers(config(), queue).unwrap();

        assert_eq!(worker.poll_task().await, PollIteration::Dispatched);
        assert_eq!(worker.poller_permits().outstanding(), 0);

        worker.stop().await.unwrap();
        assert_eq!(worker.in_flight(), 0);
        assert_eq!(worker.task_permits().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_poll_empty() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();
        assert_eq!(worker.poll_task().await, PollIteration::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_limiter_throttles() {
        let worker = BaseWorker::with_fixed_pollers(config(), queue()).unwrap();

        assert!(worker.cancel_limiter("connection refused"));
        assert!(!worker.cancel_limiter("again"));
        assert_eq!(worker.poll_task().await, PollIteration::Throttled);
        assert_eq!(worker.poller_permits().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_autoscaler_sets_pool_and_executions() {
        let tracker = AutoScaler::new(
            AutoscaleConfig::new()
                .with_min_pollers(1)
                .with_initial_pollers(2)
                .with_max_pollers(4),
        )
        .unwrap();
        let worker = BaseWorker::new(config(), queue(), Arc::new(tracker)).unwrap();
        assert_eq!(worker.poller_permits().capacity(), 2);

        worker.start().unwrap();
        assert_eq!(worker.active_pollers(), 4);

        worker.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_timeout_cancels_processing() {
        let queue = InMemoryTaskQueue::new(Duration::from_millis(20), |_: u32| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        queue.push(1);
        let worker = BaseWorker::with_fixed_pollers(config().with_poller_count(1), queue).unwrap();

        worker.start().unwrap();
        while worker.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let result = worker.stop().await;
        assert!(matches!(result, Err(WorkerError::ShutdownTimeout(_))));
        assert_eq!(worker.state(), WorkerState::Stopped);

        // the cancelled task releases its permit once it observes cancellation
        while worker.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(worker.task_permits().outstanding(), 0);
    }
}
