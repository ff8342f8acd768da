//! Poll error classification

use std::fmt;

/// Errors returned by a task source when polling
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PollError {
    /// The request was malformed or rejected by validation
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The task source refuses this client version
    #[error("client version not supported: {0}")]
    ClientVersionNotSupported(String),

    /// The poll did not complete in time
    #[error("poll timed out")]
    Timeout,

    /// The task source could not be reached
    #[error("task source unavailable: {0}")]
    Unavailable(String),

    /// The task source failed while serving the poll
    #[error("task source internal error: {0}")]
    Internal(String),

    /// Any other failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PollError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Short stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::ClientVersionNotSupported(_) => "client_version_not_supported",
            Self::Timeout => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
            Self::Other(_) => "other",
        }
    }
}

/// Whether a poll error is worth backing off for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Transient; back off and try again
    Retriable,
    /// Will fail the same way on retry; keep polling without backoff
    NonRetriable,
}

impl fmt::Display for Retryability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retriable => write!(f, "retriable"),
            Self::NonRetriable => write!(f, "non_retriable"),
        }
    }
}

/// Classify a poll error
///
/// Only client-side request failures are non-retriable. Unknown errors are
/// always retriable.
pub fn classify(error: &PollError) -> Retryability {
    match error {
        PollError::BadRequest(_) | PollError::ClientVersionNotSupported(_) => {
            Retryability::NonRetriable
        }
        PollError::Timeout
        | PollError::Unavailable(_)
        | PollError::Internal(_)
        | PollError::Other(_) => Retryability::Retriable,
    }
}

/// Result of one poll attempt after classification
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// A task was returned
    Task(T),
    /// The poll succeeded but no task was available
    Empty,
    /// Transient failure
    Retriable(PollError),
    /// Permanent failure
    NonRetriable(PollError),
}

impl<T> From<Result<Option<T>, PollError>> for PollOutcome<T> {
    fn from(result: Result<Option<T>, PollError>) -> Self {
        match result {
            Ok(Some(task)) => Self::Task(task),
            Ok(None) => Self::Empty,
            Err(error) => match classify(&error) {
                Retryability::Retriable => Self::Retriable(error),
                Retryability::NonRetriable => Self::NonRetriable(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_are_non_retriable() {
        assert_eq!(
            classify(&PollError::bad_request("missing task list")),
            Retryability::NonRetriable
        );
        assert_eq!(
            classify(&PollError::ClientVersionNotSupported("0.1".into())),
            Retryability::NonRetriable
        );
    }

    #[test]
    fn test_everything_else_is_retriable() {
        assert_eq!(classify(&PollError::Timeout), Retryability::Retriable);
        assert_eq!(
            classify(&PollError::unavailable("connection refused")),
            Retryability::Retriable
        );
        assert_eq!(
            classify(&PollError::Internal("boom".into())),
            Retryability::Retriable
        );
        assert_eq!(
            classify(&PollError::from(anyhow::anyhow!("unknown failure"))),
            Retryability::Retriable
        );
    }

    #[test]
    fn test_outcome_from_result() {
        assert!(matches!(
            PollOutcome::from(Ok::<_, PollError>(Some(7))),
            PollOutcome::Task(7)
        ));
        assert!(matches!(
            PollOutcome::<u32>::from(Ok(None)),
            PollOutcome::Empty
        ));
        assert!(matches!(
            PollOutcome::<u32>::from(Err(PollError::Timeout)),
            PollOutcome::Retriable(PollError::Timeout)
        ));
        assert!(matches!(
            PollOutcome::<u32>::from(Err(PollError::bad_request("nope"))),
            PollOutcome::NonRetriable(PollError::BadRequest(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Retryability::Retriable.to_string(), "retriable");
        assert_eq!(Retryability::NonRetriable.to_string(), "non_retriable");
        assert_eq!(
            PollError::bad_request("bad").to_string(),
            "bad request: bad"
        );
        assert_eq!(PollError::Timeout.kind(), "timeout");
    }
}
