//! Shared helpers for integration tests
#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use taskpoll::handler::TaskHandler;
use taskpoll::reliability::PollError;

/// A log event as seen by [`LogCapture`]
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
}

/// Records every tracing event emitted on the current thread
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Install as the thread-local default subscriber
    ///
    /// Keep the guard alive for the duration of the test. Use a
    /// current-thread runtime so spawned pollers log to the same thread.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Number of events whose message equals `message`
    pub fn count(&self, message: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.message == message)
            .count()
    }

    /// Number of events at `level` whose message equals `message`
    pub fn count_at(&self, level: Level, message: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level && event.message == message)
            .count()
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(message) = visitor.message {
            self.events.lock().push(CapturedEvent {
                level: *event.metadata().level(),
                message,
            });
        }
    }
}

/// Handler whose polls always fail with a retriable error
pub struct FailingHandler;

#[async_trait]
impl TaskHandler for FailingHandler {
    type Task = ();

    async fn poll_task(&self) -> Result<Option<()>, PollError> {
        Err(PollError::unavailable("poll in test will fail"))
    }

    async fn process_task(&self, _task: ()) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler whose polls always fail with a bad request
pub struct BadRequestHandler;

#[async_trait]
impl TaskHandler for BadRequestHandler {
    type Task = ();

    async fn poll_task(&self) -> Result<Option<()>, PollError> {
        Err(PollError::bad_request("bad request"))
    }

    async fn process_task(&self, _task: ()) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler whose polls never return
pub struct StalledHandler;

#[async_trait]
impl TaskHandler for StalledHandler {
    type Task = ();

    async fn poll_task(&self) -> Result<Option<()>, PollError> {
        futures::future::pending().await
    }

    async fn process_task(&self, _task: ()) -> anyhow::Result<()> {
        Ok(())
    }
}
