//! Remote registry abstraction.

use crate::errors::RegistryError;
use async_trait::async_trait;

/// Remote operations on image references that do not need a local pull.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    /// Returns whether `reference` exists remotely.
    async fn image_exists(&self, reference: &str) -> Result<bool, RegistryError>;

    /// Adds the tag `target` to the remote image `source`.
    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RegistryError>;

    /// Returns `reference` pinned by digest, e.g. `docker.io/library/alpine@sha256:...`.
    async fn image_with_digest(&self, reference: &str) -> Result<String, RegistryError>;
}
