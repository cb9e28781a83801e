//! Testing utilities for builds.
//!
//! This module provides:
//! - Recording fakes of the engine, registry and command executor
//! - Temporary builder directories

mod fixtures;
mod mocks;

pub use fixtures::BuilderFixture;
pub use mocks::{FakeEngine, FakeExecutor, FakeRegistry};
