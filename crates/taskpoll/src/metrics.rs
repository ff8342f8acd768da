//! Worker metrics.
//!
//! Counters and gauges for the poll loop and permit pools, recorded through
//! the `metrics` facade. Every series carries a `worker` label holding the
//! worker identity. Without an installed recorder all calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::concurrency::PermitPool;
use crate::reliability::Retryability;

// ============================================================================
// Poll Metrics
// ============================================================================

/// Poll attempts issued to the task handler.
pub const POLL_ATTEMPTS: &str = "taskpoll_poll_attempts_total";

/// Polls that returned a task.
pub const POLL_TASKS: &str = "taskpoll_poll_tasks_total";

/// Polls that succeeded with nothing to do.
pub const POLL_EMPTY: &str = "taskpoll_poll_empty_total";

/// Failed polls, labelled by retryability.
pub const POLL_FAILURES: &str = "taskpoll_poll_failures_total";

/// Poller permit acquisitions rejected by a cancelled limiter.
pub const POLL_THROTTLED: &str = "taskpoll_poll_throttled_total";

// ============================================================================
// Processing Metrics
// ============================================================================

/// Processed tasks, labelled by outcome.
pub const TASKS_PROCESSED: &str = "taskpoll_tasks_processed_total";

// ============================================================================
// Permit Metrics
// ============================================================================

/// Poller permits currently held.
pub const POLLER_PERMITS_IN_USE: &str = "taskpoll_poller_permits_in_use";

/// Poller pool capacity.
pub const POLLER_PERMITS_CAPACITY: &str = "taskpoll_poller_permits_capacity";

/// Task permits currently held.
pub const TASK_PERMITS_IN_USE: &str = "taskpoll_task_permits_in_use";

/// Poller pool resizes requested by the tracker.
pub const POLLER_RESIZES: &str = "taskpoll_poller_resizes_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all worker metric descriptions.
///
/// Call this once at application startup after installing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(POLL_ATTEMPTS, "Total poll attempts issued");
    describe_counter!(POLL_TASKS, "Total polls that returned a task");
    describe_counter!(POLL_EMPTY, "Total polls that returned no task");
    describe_counter!(POLL_FAILURES, "Total failed polls by retryability");
    describe_counter!(POLL_THROTTLED, "Total poller permit acquisitions rejected by backoff");
    describe_counter!(TASKS_PROCESSED, "Total processed tasks by outcome");
    describe_gauge!(POLLER_PERMITS_IN_USE, "Poller permits currently held");
    describe_gauge!(POLLER_PERMITS_CAPACITY, "Current poller pool capacity");
    describe_gauge!(TASK_PERMITS_IN_USE, "Task permits currently held");
    describe_counter!(POLLER_RESIZES, "Total poller pool resizes");
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records a poll attempt.
pub fn record_poll_attempt(worker: &str) {
    counter!(POLL_ATTEMPTS, "worker" => worker.to_string()).increment(1);
}

/// Records a poll that returned a task.
pub fn record_poll_task(worker: &str) {
    counter!(POLL_TASKS, "worker" => worker.to_string()).increment(1);
}

/// Records an empty poll.
pub fn record_poll_empty(worker: &str) {
    counter!(POLL_EMPTY, "worker" => worker.to_string()).increment(1);
}

/// Records a failed poll.
pub fn record_poll_failure(worker: &str, retryability: Retryability) {
    let labels = [
        ("worker", worker.to_string()),
        ("retryability", retryability.to_string()),
    ];
    counter!(POLL_FAILURES, &labels).increment(1);
}

/// Records a throttled poller permit acquisition.
pub fn record_throttled(worker: &str) {
    counter!(POLL_THROTTLED, "worker" => worker.to_string()).increment(1);
}

/// Records the end of task processing.
///
/// `outcome` is one of `success`, `failure` or `cancelled`.
pub fn record_task_processed(worker: &str, outcome: &'static str) {
    let labels = [("worker", worker.to_string()), ("outcome", outcome.to_string())];
    counter!(TASKS_PROCESSED, &labels).increment(1);
}

/// Records a poller pool resize.
pub fn record_poller_resize(worker: &str, capacity: usize) {
    counter!(POLLER_RESIZES, "worker" => worker.to_string()).increment(1);
    gauge!(POLLER_PERMITS_CAPACITY, "worker" => worker.to_string()).set(capacity as f64);
}

/// Records permit usage for both pools.
pub fn record_permit_usage(worker: &str, pollers: &PermitPool, tasks: &PermitPool) {
    gauge!(POLLER_PERMITS_IN_USE, "worker" => worker.to_string()).set(pollers.outstanding() as f64);
    gauge!(POLLER_PERMITS_CAPACITY, "worker" => worker.to_string()).set(pollers.capacity() as f64);
    gauge!(TASK_PERMITS_IN_USE, "worker" => worker.to_string()).set(tasks.outstanding() as f64);
}
