//! TaskHandler trait definition

use async_trait::async_trait;

use crate::reliability::PollError;

/// Source and executor of tasks
///
/// The worker calls [`poll_task`](Self::poll_task) from its poller
/// executions and [`process_task`](Self::process_task) from a separate
/// execution per task, so implementations must tolerate concurrent calls to
/// both. Either future may be dropped at an await point when the worker
/// stops.
///
/// # Example
///
/// ```ignore
/// use taskpoll::prelude::*;
///
/// struct QueueClient { /* ... */ }
///
/// #[async_trait]
/// impl TaskHandler for QueueClient {
///     type Task = Job;
///
///     async fn poll_task(&self) -> Result<Option<Job>, PollError> {
///         match self.long_poll().await {
///             Ok(job) => Ok(job),
///             Err(e) if e.is_validation() => Err(PollError::bad_request(e.to_string())),
///             Err(e) => Err(PollError::Other(e.into())),
///         }
///     }
///
///     async fn process_task(&self, job: Job) -> anyhow::Result<()> {
///         job.run().await
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Task payload handed from poll to process
    type Task: Send + 'static;

    /// Fetch the next task
    ///
    /// `Ok(None)` means the poll succeeded but nothing was available.
    async fn poll_task(&self) -> Result<Option<Self::Task>, PollError>;

    /// Execute a task
    ///
    /// The result is logged and counted; it never affects polling.
    async fn process_task(&self, task: Self::Task) -> anyhow::Result<()>;
}

#[async_trait]
impl<H: TaskHandler> TaskHandler for std::sync::Arc<H> {
    type Task = H::Task;

    async fn poll_task(&self) -> Result<Option<Self::Task>, PollError> {
        (**self).poll_task().await
    }

    async fn process_task(&self, task: Self::Task) -> anyhow::Result<()> {
        (**self).process_task(task).await
    }
}
