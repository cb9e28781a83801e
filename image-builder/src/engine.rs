//! Container engine abstraction.
//!
//! Concrete engines (docker, podman, buildah, buildkit) live outside this
//! crate and are plugged in through [`BuildEngine`].

use crate::errors::EngineError;
use async_trait::async_trait;
use std::path::Path;

/// A container engine able to build, push, pull and tag images.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Returns the engine name, e.g. "docker".
    fn name(&self) -> &str;

    /// Returns the engine version.
    async fn version(&self) -> Result<String, EngineError>;

    /// Builds `image` from `build_file` using `context` as build context.
    async fn build(&self, build_file: &Path, image: &str, context: &Path) -> Result<(), EngineError>;

    /// Pushes `image`.
    async fn push(&self, image: &str) -> Result<(), EngineError>;

    /// Pulls `image`.
    async fn pull(&self, image: &str) -> Result<(), EngineError>;

    /// Tags the local image `source` as `target`.
    async fn tag(&self, source: &str, target: &str) -> Result<(), EngineError>;

    /// Returns the fused build-and-push capability, if the engine has one.
    fn as_build_and_push(&self) -> Option<&dyn BuildAndPush> {
        None
    }
}

/// Engines that build and push in one atomic step.
#[async_trait]
pub trait BuildAndPush: Send + Sync {
    /// Builds `image` and pushes it.
    async fn build_and_push(
        &self,
        build_file: &Path,
        image: &str,
        context: &Path,
    ) -> Result<(), EngineError>;
}
