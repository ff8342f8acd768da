//! Worker lifecycle and poll loop
//!
//! This module provides:
//! - [`BaseWorker`] - Poller executions, task dispatch and graceful shutdown
//! - [`WorkerConfig`] - Concurrency caps, backoff and shutdown settings
//! - [`PollerTracker`] / [`AutoScaler`] - Poller count feedback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BaseWorker                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Poller 1   │  │  Poller 2   │  │     Poller N        │  │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//! │         └────────────────┼────────────────────┘             │
//! │                          ▼                                   │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │   Poller PermitPool  ◄── LimiterContext (backoff)   │    │
//! │  │   (resized by the PollerTracker)                    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                          │ TaskHandler::poll_task            │
//! │                          ▼                                   │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │   Task PermitPool (max_concurrent_tasks)            │    │
//! │  │   [Task 1] [Task 2] [Task 3] ... [Task N]           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use taskpoll::worker::{AutoScaler, AutoscaleConfig, BaseWorker, WorkerConfig};
//!
//! let config = WorkerConfig::from_env().with_max_concurrent_tasks(20);
//! let tracker = AutoScaler::new(AutoscaleConfig::default().with_max_pollers(8))?;
//!
//! let worker = BaseWorker::new(config, OrdersHandler::connect().await?, Arc::new(tracker))?;
//! worker.start()?;
//!
//! // Graceful shutdown
//! worker.stop().await?;
//! ```

mod base;
mod config;
mod idle;
mod state;
mod tracker;

pub use base::{BaseWorker, PollIteration, WorkerError};
pub use config::WorkerConfig;
pub use idle::IdlePollConfig;
pub use state::WorkerState;
pub use tracker::{
    AutoScaler, AutoscaleConfig, AutoscaleError, NoopPollerTracker, PollSignal, PollerTracker,
};
