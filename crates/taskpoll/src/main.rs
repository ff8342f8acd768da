use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use taskpoll::handler::InMemoryTaskQueue;
use taskpoll::telemetry::{init_telemetry, TelemetryConfig};
use taskpoll::worker::{BaseWorker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "taskpoll=info")
    // - TASKPOLL_*: Worker settings, see WorkerConfig::from_env
    // - TASKPOLL_DEMO_TASKS: Number of tasks to seed (default: 100)
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "taskpoll" {
        telemetry_config.service_name = "taskpoll-worker".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("taskpoll=info".to_string());
    }
    init_telemetry(telemetry_config).context("Failed to initialize telemetry")?;
    taskpoll::metrics::register_metrics();

    let config = WorkerConfig::from_env();
    let seeded: u64 = std::env::var("TASKPOLL_DEMO_TASKS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    let queue = Arc::new(InMemoryTaskQueue::new(
        Duration::from_millis(250),
        |job: u64| async move {
            let work = Duration::from_millis(rand::thread_rng().gen_range(10..100));
            tokio::time::sleep(work).await;
            anyhow::ensure!(job % 20 != 0, "job {job} failed");
            Ok(())
        },
    ));
    queue.extend(1..=seeded);

    tracing::info!(
        identity = %config.identity,
        max_concurrent = config.max_concurrent_tasks,
        pollers = config.poller_count,
        tasks = seeded,
        "Starting taskpoll worker"
    );

    let worker = BaseWorker::with_fixed_pollers(config, Arc::clone(&queue))
        .context("Failed to create worker")?;
    worker.start().context("Failed to start worker")?;

    let drained = async {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            ticker.tick().await;
            if (queue.processed() + queue.failed()) as u64 >= seeded {
                break;
            }
        }
    };

    tokio::select! {
        _ = drained => tracing::info!("Queue drained"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Received shutdown signal"),
    }

    worker.stop().await.context("Worker did not shut down cleanly")?;

    tracing::info!(
        processed = queue.processed(),
        failed = queue.failed(),
        "Worker shutdown complete"
    );
    Ok(())
}
