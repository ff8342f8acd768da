//! Worker lifecycle state

use std::fmt;

/// Worker lifecycle state
///
/// ```text
/// ┌─────────┐  start  ┌─────────┐  stop  ┌──────────┐  drained  ┌─────────┐
/// │ Created │ ──────► │ Running │ ─────► │ Stopping │ ────────► │ Stopped │
/// └─────────┘         └─────────┘        └──────────┘           └─────────┘
///      │                                                             ▲
///      └──────────────────────────── stop ───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, no pollers spawned
    Created,
    /// Pollers are running
    Running,
    /// Stop requested, waiting for pollers and in-flight tasks
    Stopping,
    /// Terminal
    Stopped,
}

impl WorkerState {
    /// Whether a stop has been requested or completed
    pub fn is_stopping(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
