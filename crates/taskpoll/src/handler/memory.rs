//! In-memory task source
//!
//! Suitable for demos and tests. Polls long-poll against a local queue and
//! return `Ok(None)` when nothing arrives before the poll timeout.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::definition::TaskHandler;
use crate::reliability::PollError;

/// Processing function type
pub type TaskProcessor<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Process-local task queue implementing [`TaskHandler`]
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use taskpoll::handler::{InMemoryTaskQueue, TaskHandler};
///
/// # tokio_test::block_on(async {
/// let queue = InMemoryTaskQueue::new(Duration::from_millis(10), |n: u32| async move {
///     anyhow::ensure!(n > 0, "zero is not a job");
///     Ok(())
/// });
/// queue.push(7);
///
/// let task = queue.poll_task().await.unwrap().unwrap();
/// queue.process_task(task).await.unwrap();
/// assert_eq!(queue.processed(), 1);
/// # });
/// ```
pub struct InMemoryTaskQueue<T> {
    tasks: Mutex<VecDeque<T>>,
    injected_errors: Mutex<VecDeque<PollError>>,
    notify: Notify,
    poll_timeout: Duration,
    processor: TaskProcessor<T>,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl<T: Send + 'static> InMemoryTaskQueue<T> {
    /// Create an empty queue
    pub fn new<F, Fut>(poll_timeout: Duration, processor: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let processor: TaskProcessor<T> = Arc::new(move |task| Box::pin(processor(task)));
        Self {
            tasks: Mutex::new(VecDeque::new()),
            injected_errors: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            poll_timeout,
            processor,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Enqueue a task and wake one waiting poll
    pub fn push(&self, task: T) {
        self.tasks.lock().push_back(task);
        self.notify.notify_one();
    }

    /// Enqueue several tasks
    pub fn extend(&self, tasks: impl IntoIterator<Item = T>) {
        let added = {
            let mut queue = self.tasks.lock();
            let before = queue.len();
            queue.extend(tasks);
            queue.len() - before
        };
        for _ in 0..added {
            self.notify.notify_one();
        }
    }

    /// Make the next poll fail with `error`
    ///
    /// Injected errors are returned in order, ahead of any queued task.
    pub fn inject_error(&self, error: PollError) {
        self.injected_errors.lock().push_back(error);
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Number of tasks processed successfully
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Number of tasks whose processing failed
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    fn pop(&self) -> Option<T> {
        self.tasks.lock().pop_front()
    }

    fn next_injected_error(&self) -> Option<PollError> {
        self.injected_errors.lock().pop_front()
    }
}

#[async_trait]
impl<T: Send + 'static> TaskHandler for InMemoryTaskQueue<T> {
    type Task = T;

    async fn poll_task(&self) -> Result<Option<T>, PollError> {
        if let Some(error) = self.next_injected_error() {
            return Err(error);
        }

        let deadline = tokio::time::sleep(self.poll_timeout);
        tokio::pin!(deadline);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.pop() {
                return Ok(Some(task));
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = &mut deadline => return Ok(None),
            }
        }
    }

    async fn process_task(&self, task: T) -> anyhow::Result<()> {
        let result = (self.processor)(task).await;
        match &result {
            Ok(()) => self.processed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}
