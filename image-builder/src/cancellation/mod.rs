//! Structured cancellation for fan-out builds.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation
//! - TaskGroup for spawning related tasks and collecting the first error

mod task_group;
mod token;

pub use task_group::TaskGroup;
pub use token::CancellationToken;
