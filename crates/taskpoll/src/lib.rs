//! # Taskpoll
//!
//! Worker-side polling and admission control for task queues.
//!
//! ## Features
//!
//! - **Bounded concurrency**: Separate permit pools cap in-flight polls and in-flight tasks
//! - **Error classification**: Retriable poll errors back off, non-retriable ones never do
//! - **Limiter-context backoff**: A cancellable token gates polling during an escalating cooldown
//! - **Poller autoscaling**: Utilization feedback grows and shrinks the poller pool
//! - **Graceful lifecycle**: Idempotent start/stop with a bounded shutdown deadline
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BaseWorker                            │
//! │  (poller executions, lifecycle, task dispatch)              │
//! └─────────────────────────────────────────────────────────────┘
//!            │                    │                    │
//!            ▼                    ▼                    ▼
//! ┌───────────────────┐ ┌───────────────────┐ ┌───────────────────┐
//! │    PermitPool     │ │ BackoffController │ │   PollerTracker   │
//! │ (tasks, pollers)  │ │ (LimiterContext)  │ │   (AutoScaler)    │
//! └───────────────────┘ └───────────────────┘ └───────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TaskHandler                            │
//! │  (caller supplied: poll_task / process_task)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use taskpoll::prelude::*;
//!
//! struct Orders { client: OrdersClient }
//!
//! #[async_trait]
//! impl TaskHandler for Orders {
//!     type Task = Order;
//!
//!     async fn poll_task(&self) -> Result<Option<Order>, PollError> {
//!         self.client.next_order().await.map_err(PollError::from)
//!     }
//!
//!     async fn process_task(&self, order: Order) -> anyhow::Result<()> {
//!         order.ship().await
//!     }
//! }
//!
//! let worker = BaseWorker::with_fixed_pollers(WorkerConfig::from_env(), Orders { client })?;
//! worker.start()?;
//! // ...
//! worker.stop().await?;
//! ```

pub mod concurrency;
pub mod handler;
pub mod metrics;
pub mod reliability;
pub mod telemetry;
pub mod worker;

mod duration_millis;

/// Prelude for common imports
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::concurrency::{Permit, PermitError, PermitPool};
    pub use crate::handler::{InMemoryTaskQueue, TaskHandler};
    pub use crate::reliability::{BackoffConfig, PollError, Retryability};
    pub use crate::worker::{
        AutoScaler, AutoscaleConfig, BaseWorker, NoopPollerTracker, PollerTracker, WorkerConfig,
        WorkerError, WorkerState,
    };
}

// Re-export key types at crate root
pub use concurrency::{Permit, PermitError, PermitPool};
pub use handler::{InMemoryTaskQueue, TaskHandler};
pub use reliability::{
    classify, BackoffConfig, PollError, PollOutcome, Retryability, CONTINUE_POLLING_NOTICE,
    THROTTLE_WARNING,
};
pub use worker::{
    AutoScaler, AutoscaleConfig, BaseWorker, NoopPollerTracker, PollIteration, PollSignal,
    PollerTracker, WorkerConfig, WorkerError, WorkerState,
};
