//! Task handler interface
//!
//! This module provides:
//! - [`TaskHandler`] - Poll/process capability supplied by the caller
//! - [`InMemoryTaskQueue`] - Process-local task source for demos and tests

mod definition;
mod memory;

pub use definition::TaskHandler;
pub use memory::{InMemoryTaskQueue, TaskProcessor};
