//! Recording fakes of the external collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::engine::{BuildAndPush, BuildEngine};
use crate::errors::{EngineError, RegistryError};
use crate::executor::{CommandExecutor, CommandOutput, CommandSpec};
use crate::registry::Registry;

/// An engine recording calls as `Build(image)`, `Push(image)`,
/// `Pull(image)`, `Tag(src,dst)` and `BuildAndPush(image)`.
///
/// Calls are recorded when they complete, after any configured delay.
#[derive(Debug, Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, String>>,
    /// Current and peak number of running calls per operation.
    in_flight: Mutex<HashMap<String, (usize, usize)>>,
    build_and_push: bool,
}

impl FakeEngine {
    /// Creates an engine without the fused build-and-push capability.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the fused build-and-push capability.
    #[must_use]
    pub fn with_build_and_push(mut self) -> Self {
        self.build_and_push = true;
        self
    }

    /// Delays every operation on `image`.
    #[must_use]
    pub fn with_delay(self, image: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().insert(image.into(), delay);
        self
    }

    /// Makes the call rendered as `call`, e.g. `Build(img:tag)`, fail.
    #[must_use]
    pub fn with_failure(self, call: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.lock().insert(call.into(), message.into());
        self
    }

    /// Returns the recorded calls.
    #[must_use]
    pub fn method_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns the recorded calls starting with `prefix`.
    #[must_use]
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the highest number of `operation` calls that ran at once,
    /// e.g. `pull` or `build`.
    #[must_use]
    pub fn max_in_flight(&self, operation: &str) -> usize {
        self.in_flight
            .lock()
            .get(operation)
            .map_or(0, |(_, peak)| *peak)
    }

    /// Forgets the recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
        self.in_flight.lock().clear();
    }

    async fn record(&self, operation: &str, image: &str, call: String) -> Result<(), EngineError> {
        {
            let mut in_flight = self.in_flight.lock();
            let (current, peak) = in_flight.entry(operation.to_string()).or_default();
            *current += 1;
            *peak = (*peak).max(*current);
        }

        let delay = self.delays.lock().get(image).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((current, _)) = self.in_flight.lock().get_mut(operation) {
            *current -= 1;
        }

        let failure = self.failures.lock().get(&call).cloned();
        self.calls.lock().push(call);
        match failure {
            Some(message) => Err(EngineError::new("fake", operation, image, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BuildEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn version(&self) -> Result<String, EngineError> {
        Ok("0.0.0-fake".to_string())
    }

    async fn build(&self, _build_file: &Path, image: &str, _context: &Path) -> Result<(), EngineError> {
        self.record("build", image, format!("Build({image})")).await
    }

    async fn push(&self, image: &str) -> Result<(), EngineError> {
        self.record("push", image, format!("Push({image})")).await
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        self.record("pull", image, format!("Pull({image})")).await
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), EngineError> {
        self.record("tag", source, format!("Tag({source},{target})")).await
    }

    fn as_build_and_push(&self) -> Option<&dyn BuildAndPush> {
        if self.build_and_push {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl BuildAndPush for FakeEngine {
    async fn build_and_push(
        &self,
        _build_file: &Path,
        image: &str,
        _context: &Path,
    ) -> Result<(), EngineError> {
        self.record("build-and-push", image, format!("BuildAndPush({image})"))
            .await
    }
}

/// An in-memory registry recording calls as `ImageExists(ref)`,
/// `TagImage(src,dst)` and `ImageWithDigest(ref)`.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    images: Mutex<HashSet<String>>,
    failing_lookups: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing image.
    #[must_use]
    pub fn with_image(self, reference: impl Into<String>) -> Self {
        self.add_image(reference);
        self
    }

    /// Adds an existing image to a shared registry.
    pub fn add_image(&self, reference: impl Into<String>) {
        self.images.lock().insert(reference.into());
    }

    /// Makes existence checks of `reference` fail.
    #[must_use]
    pub fn with_failing_lookup(self, reference: impl Into<String>) -> Self {
        self.failing_lookups.lock().insert(reference.into());
        self
    }

    /// Returns true if the registry holds `reference`.
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.images.lock().contains(reference)
    }

    /// Returns the recorded calls.
    #[must_use]
    pub fn method_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn image_exists(&self, reference: &str) -> Result<bool, RegistryError> {
        self.calls.lock().push(format!("ImageExists({reference})"));
        if self.failing_lookups.lock().contains(reference) {
            return Err(RegistryError::new("lookup", reference, "service unavailable"));
        }
        Ok(self.contains(reference))
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RegistryError> {
        self.calls.lock().push(format!("TagImage({source},{target})"));
        if !self.contains(source) {
            return Err(RegistryError::new("tag", source, "manifest unknown"));
        }
        self.images.lock().insert(target.to_string());
        Ok(())
    }

    async fn image_with_digest(&self, reference: &str) -> Result<String, RegistryError> {
        self.calls.lock().push(format!("ImageWithDigest({reference})"));
        let name = reference.split(':').next().unwrap_or(reference);
        Ok(format!("{name}@sha256:{:08x}", crc32fast::hash(reference.as_bytes())))
    }
}

/// An executor answering commands from canned responses.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    responses: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeExecutor {
    /// Creates an executor without responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output of the command line `command`, e.g. `git rev-parse HEAD`.
    pub fn respond(&self, command: impl Into<String>, output: CommandOutput) {
        self.responses.lock().insert(command.into(), output);
    }

    /// Returns the executed commands.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
        self.calls.lock().push(command.clone());
        let line = command.display();
        Ok(self
            .responses
            .lock()
            .get(&line)
            .cloned()
            .unwrap_or_else(|| CommandOutput::failed(format!("no response configured for '{line}'"))))
    }
}
