//! Poll failure handling
//!
//! This module provides:
//! - [`classify`] - Maps a [`PollError`] to [`Retryability`]
//! - [`BackoffController`] - Limiter-context backoff with escalating cooldown

mod backoff;
mod classify;

pub use backoff::{
    BackoffConfig, BackoffController, BackoffError, LimiterContext, CONTINUE_POLLING_NOTICE, THROTTLE_WARNING,
};
pub use classify::{classify, PollError, PollOutcome, Retryability};
