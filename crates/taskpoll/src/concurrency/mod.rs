//! Admission control primitives
//!
//! This module provides:
//! - [`PermitPool`] - Resizable counting semaphore with cancellable acquisition
//! - [`Permit`] - RAII slot handle returned to its pool on drop

mod permit;

pub use permit::{Permit, PermitError, PermitPool};
