//! Build preparation and execution.
//!
//! This module provides:
//! - The build coordinator and its builder
//! - Named locks serializing work on a stage
//! - The summary file

mod coordinator;
mod locks;
mod summary;

pub use coordinator::{Build, BuildBuilder, BuildReport};
pub use locks::NamedLocks;
pub use summary::{format_summary, write_summary, SUMMARY_FILE_NAME};
