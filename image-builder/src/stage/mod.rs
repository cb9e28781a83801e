//! Stages of a builder.
//!
//! A [`Stage`] turns one template into one image. Its lifecycle is
//! `Initialized -> Absent -> Built` when the image has to be built, or
//! `Initialized -> Cached -> Pulled` when an existing image is reused by a
//! dependent stage.

mod status;

pub use status::StageStatus;

use crate::engine::{BuildAndPush, BuildEngine};
use crate::errors::{ImageBuilderError, Result};
use crate::fingerprint::Fingerprinter;
use crate::template::{Directives, FunctionContext, StageResolver, TemplateRenderer};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Name of the template file of a stage, and of the rendered build file.
pub const BUILD_FILE_NAME: &str = "Dockerfile";

/// Name of the ignore file of a build context.
pub const IGNORE_FILE_NAME: &str = ".dockerignore";

/// Ignore file read by engines next to a build file named [`BUILD_FILE_NAME`].
pub const BUILD_IGNORE_FILE_NAME: &str = "Dockerfile.dockerignore";

#[derive(Debug, Default)]
struct StageState {
    status: StageStatus,
    content: Option<String>,
    dependencies: Vec<String>,
    directives: Option<Directives>,
    content_hash: Option<String>,
    image_url: String,
    source_image_url: String,
}

/// A serializable view of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// The stage name.
    pub name: String,
    /// The current status.
    pub status: StageStatus,
    /// The content hash, once computed.
    pub content_hash: Option<String>,
    /// The target image reference.
    pub image: String,
    /// Where the image is pulled from.
    pub source_image: String,
    /// Referenced stages.
    pub dependencies: Vec<String>,
}

/// Rendered build files in a private temporary directory.
///
/// The directory is removed on drop.
#[derive(Debug)]
pub struct BuildFiles {
    dir: TempDir,
}

impl BuildFiles {
    /// Returns the path of the build file.
    #[must_use]
    pub fn build_file(&self) -> PathBuf {
        self.dir.path().join(BUILD_FILE_NAME)
    }

    /// Returns the path of the ignore file.
    #[must_use]
    pub fn ignore_file(&self) -> PathBuf {
        self.dir.path().join(BUILD_IGNORE_FILE_NAME)
    }
}

/// A unit of work producing one image.
#[derive(Debug)]
pub struct Stage {
    name: String,
    template: String,
    stage_directory: PathBuf,
    local_context: PathBuf,
    configured_ignores: Vec<String>,
    state: RwLock<StageState>,
}

impl Stage {
    /// Creates a stage from its template text.
    #[must_use]
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            stage_directory: PathBuf::from("."),
            local_context: PathBuf::from("."),
            configured_ignores: Vec::new(),
            state: RwLock::new(StageState::default()),
        }
    }

    /// Sets the directory holding the stage template.
    #[must_use]
    pub fn with_stage_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stage_directory = dir.into();
        self
    }

    /// Sets the directory the build was invoked from.
    #[must_use]
    pub fn with_local_context(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_context = dir.into();
        self
    }

    /// Sets the ignore patterns coming from the build configuration.
    #[must_use]
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.configured_ignores = patterns;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the directory holding the stage template.
    #[must_use]
    pub fn stage_directory(&self) -> &Path {
        &self.stage_directory
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.state.read().status
    }

    /// Moves the stage to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`ImageBuilderError::InvalidStatus`] if `next` does not follow
    /// the current status.
    pub fn transition(&self, next: StageStatus) -> Result<()> {
        let mut state = self.state.write();
        if !state.status.can_transition_to(next) {
            return Err(ImageBuilderError::InvalidStatus {
                stage: self.name.clone(),
                hash: state.content_hash.clone().unwrap_or_default(),
                status: state.status.to_string(),
            });
        }
        debug!(stage = %self.name, from = %state.status, to = %next, "Stage status changed");
        state.status = next;
        Ok(())
    }

    /// Returns true once the template has been rendered.
    #[must_use]
    pub fn is_rendered(&self) -> bool {
        self.state.read().content.is_some()
    }

    /// Returns the rendered build instructions.
    #[must_use]
    pub fn rendered_content(&self) -> Option<String> {
        self.state.read().content.clone()
    }

    /// Returns the referenced stages, in order of first reference.
    #[must_use]
    pub fn required_stages(&self) -> Vec<String> {
        self.state.read().dependencies.clone()
    }

    /// Returns the directives of the first render, or none before it.
    #[must_use]
    pub fn directives(&self) -> Directives {
        self.state.read().directives.clone().unwrap_or_default()
    }

    /// Returns the friendly tag prefix.
    #[must_use]
    pub fn friendly_tag(&self) -> Option<String> {
        self.directives().friendly_tag
    }

    /// Returns the references to apply after push.
    #[must_use]
    pub fn tag_aliases(&self) -> Vec<String> {
        self.directives().tag_aliases
    }

    /// Returns whether the stage directory is the build context.
    ///
    /// Before the first render the raw template decides.
    #[must_use]
    pub fn use_builder_context(&self) -> bool {
        match &self.state.read().directives {
            Some(directives) => directives.use_builder_context,
            None => Directives::parse(&self.template).use_builder_context,
        }
    }

    /// Returns the build context directory.
    #[must_use]
    pub fn build_context(&self) -> PathBuf {
        if self.use_builder_context() {
            self.stage_directory.clone()
        } else {
            self.local_context.clone()
        }
    }

    /// Returns every ignore pattern of the stage: configured patterns, the
    /// ignore file itself, then the template's `DockerIgnore` directives.
    #[must_use]
    pub fn ignore_patterns(&self) -> Vec<String> {
        let mut patterns = self.configured_ignores.clone();
        patterns.push(IGNORE_FILE_NAME.to_string());
        patterns.extend(self.directives().docker_ignores);
        patterns
    }

    /// Renders the template.
    ///
    /// Directives are parsed on the first successful render only.
    ///
    /// # Errors
    ///
    /// Returns render errors, including cycles reported by `resolver`.
    pub async fn render(
        &self,
        renderer: &TemplateRenderer,
        ctx: &FunctionContext<'_>,
        resolver: &dyn StageResolver,
    ) -> Result<()> {
        let rendered = renderer.render(&self.template, ctx, resolver).await?;

        let mut state = self.state.write();
        if state.directives.is_none() {
            state.directives = Some(Directives::parse(&rendered.content));
        }
        state.content = Some(rendered.content);
        state.dependencies = rendered.dependencies;
        Ok(())
    }

    /// Returns the content hash, if computed.
    #[must_use]
    pub fn content_hash(&self) -> Option<String> {
        self.state.read().content_hash.clone()
    }

    /// Computes the content hash once and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ImageBuilderError::NotPrepared`] before the first render,
    /// and fingerprinting errors.
    pub async fn compute_content_hash(&self, fingerprinter: &Fingerprinter) -> Result<String> {
        if let Some(hash) = self.content_hash() {
            return Ok(hash);
        }

        let content = self
            .rendered_content()
            .ok_or_else(|| ImageBuilderError::NotPrepared(self.name.clone()))?;
        let context = self.build_context();
        let patterns = self.ignore_patterns();
        let fingerprinter = fingerprinter.clone();
        debug!(stage = %self.name, context = %context.display(), "Computing content hash");

        let hash = tokio::task::spawn_blocking(move || {
            fingerprinter.fingerprint(&content, &context, &patterns)
        })
        .await
        .map_err(|err| ImageBuilderError::Internal(format!("content hashing task failed: {err}")))??;

        let mut state = self.state.write();
        Ok(state.content_hash.get_or_insert(hash).clone())
    }

    /// Returns the image tag: the content hash, prefixed with the friendly
    /// tag if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ImageBuilderError::NotPrepared`] if the hash is unknown.
    pub fn image_tag(&self) -> Result<String> {
        let hash = self
            .content_hash()
            .ok_or_else(|| ImageBuilderError::NotPrepared(self.name.clone()))?;
        Ok(match self.friendly_tag() {
            Some(friendly) => format!("{friendly}-{hash}"),
            None => hash,
        })
    }

    /// Returns the target image reference.
    #[must_use]
    pub fn image_url(&self) -> String {
        self.state.read().image_url.clone()
    }

    /// Returns the reference the image is pulled from.
    #[must_use]
    pub fn source_image_url(&self) -> String {
        self.state.read().source_image_url.clone()
    }

    /// Sets the target and source image references.
    pub fn set_image_urls(&self, target: impl Into<String>, source: impl Into<String>) {
        let mut state = self.state.write();
        state.image_url = target.into();
        state.source_image_url = source.into();
    }

    /// Sets the source image reference only.
    pub fn set_source_image_url(&self, source: impl Into<String>) {
        self.state.write().source_image_url = source.into();
    }

    /// Writes the build file and its ignore file to a fresh temporary
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`ImageBuilderError::NotPrepared`] before the first render,
    /// and IO errors.
    pub async fn write_build_files(&self) -> Result<BuildFiles> {
        let content = self
            .rendered_content()
            .ok_or_else(|| ImageBuilderError::NotPrepared(self.name.clone()))?;

        let files = BuildFiles {
            dir: tempfile::Builder::new().prefix("image-builder-").tempdir()?,
        };
        tokio::fs::write(files.build_file(), content).await?;

        let mut ignores = self.ignore_patterns().join("\n");
        ignores.push('\n');
        tokio::fs::write(files.ignore_file(), ignores).await?;

        Ok(files)
    }

    /// Builds the image with `engine`.
    ///
    /// # Errors
    ///
    /// Returns IO errors from writing the build files and engine errors.
    pub async fn build(&self, engine: &dyn BuildEngine) -> Result<()> {
        let files = self.write_build_files().await?;
        let context = self.build_context();
        info!(stage = %self.name, context = %context.display(), "Building");

        engine
            .build(&files.build_file(), &self.image_url(), &context)
            .await?;
        Ok(())
    }

    /// Builds and pushes the image in one step.
    ///
    /// # Errors
    ///
    /// Returns IO errors from writing the build files and engine errors.
    pub async fn build_and_push(&self, engine: &dyn BuildAndPush) -> Result<()> {
        let files = self.write_build_files().await?;
        let context = self.build_context();
        info!(stage = %self.name, context = %context.display(), "Building and pushing");

        engine
            .build_and_push(&files.build_file(), &self.image_url(), &context)
            .await?;
        Ok(())
    }

    /// Returns a serializable view of the stage.
    #[must_use]
    pub fn snapshot(&self) -> StageSnapshot {
        let state = self.state.read();
        StageSnapshot {
            name: self.name.clone(),
            status: state.status,
            content_hash: state.content_hash.clone(),
            image: state.image_url.clone(),
            source_image: state.source_image_url.clone(),
            dependencies: state.dependencies.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfiguration;
    use crate::testing::{FakeEngine, FakeExecutor, FakeRegistry};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::fs;

    struct FixedResolver;

    #[async_trait]
    impl StageResolver for FixedResolver {
        async fn resolve_stage(&self, _stage: &str) -> Result<String> {
            Ok("none".to_string())
        }
    }

    struct Env {
        configuration: BuildConfiguration,
        executor: FakeExecutor,
        registry: FakeRegistry,
        renderer: TemplateRenderer,
    }

    impl Env {
        fn new() -> Self {
            Self {
                configuration: BuildConfiguration::new(),
                executor: FakeExecutor::new(),
                registry: FakeRegistry::new(),
                renderer: TemplateRenderer::default(),
            }
        }

        async fn render(&self, stage: &Stage) -> Result<()> {
            let dir = stage.build_context();
            let ctx = FunctionContext {
                stage: stage.name(),
                configuration: &self.configuration,
                context_dir: &dir,
                executor: &self.executor,
                registry: &self.registry,
            };
            stage.render(&self.renderer, &ctx, &FixedResolver).await
        }
    }

    #[tokio::test]
    async fn test_empty_stage_hash() {
        let env = Env::new();
        let context = tempfile::tempdir().unwrap();
        let stage = Stage::new("empty", "").with_local_context(context.path());

        env.render(&stage).await.unwrap();
        let hash = stage.compute_content_hash(&Fingerprinter::default()).await.unwrap();

        assert_eq!(hash, "00000000");
        assert_eq!(stage.image_tag().unwrap(), "00000000");
    }

    #[tokio::test]
    async fn test_hash_is_memoized() {
        let env = Env::new();
        let context = tempfile::tempdir().unwrap();
        fs::write(context.path().join("app.rb"), "puts 1").unwrap();
        let stage = Stage::new("app", "FROM ruby").with_local_context(context.path());
        env.render(&stage).await.unwrap();

        let fingerprinter = Fingerprinter::default();
        let first = stage.compute_content_hash(&fingerprinter).await.unwrap();
        fs::write(context.path().join("app.rb"), "puts 2").unwrap();
        let second = stage.compute_content_hash(&Fingerprinter::default()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(stage.content_hash(), Some(first));
    }

    #[tokio::test]
    async fn test_hash_requires_render() {
        let stage = Stage::new("app", "FROM ruby");
        let err = stage
            .compute_content_hash(&Fingerprinter::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ImageBuilderError::NotPrepared(ref name) if name == "app"));
        assert!(stage.image_tag().is_err());
    }

    #[tokio::test]
    async fn test_friendly_tag_and_directives() {
        let env = Env::new();
        let context = tempfile::tempdir().unwrap();
        let template = "\
# FriendlyTag ruby
# FriendlyTag ignored
# TagAlias registry.local/ruby:latest
# DockerIgnore *.log
FROM {{ BuilderStage \"base\" }}
";
        let stage = Stage::new("app", template)
            .with_local_context(context.path())
            .with_ignore_patterns(vec!["tmp".to_string()]);

        env.render(&stage).await.unwrap();
        let hash = stage.compute_content_hash(&Fingerprinter::default()).await.unwrap();

        assert_eq!(stage.image_tag().unwrap(), format!("ruby-{hash}"));
        assert_eq!(stage.tag_aliases(), vec!["registry.local/ruby:latest"]);
        assert_eq!(stage.required_stages(), vec!["base"]);
        assert_eq!(stage.ignore_patterns(), vec!["tmp", ".dockerignore", "*.log"]);
        assert!(stage.rendered_content().unwrap().contains("FROM none"));
    }

    #[tokio::test]
    async fn test_builder_context_directive() {
        let env = Env::new();
        let stage_dir = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        fs::write(stage_dir.path().join("VERSION"), "1.2.3\n").unwrap();

        let stage = Stage::new("app", "# UseBuilderContext\nLABEL version={{ File \"VERSION\" }}")
            .with_stage_directory(stage_dir.path())
            .with_local_context(local.path());

        assert_eq!(stage.build_context(), stage_dir.path());
        env.render(&stage).await.unwrap();

        assert!(stage.use_builder_context());
        assert_eq!(stage.build_context(), stage_dir.path());
        assert!(stage.rendered_content().unwrap().ends_with("version=1.2.3"));
    }

    #[tokio::test]
    async fn test_rerender_keeps_directives() {
        let env = Env::new();
        let stage = Stage::new("app", "# FriendlyTag one\nFROM scratch");
        env.render(&stage).await.unwrap();
        env.render(&stage).await.unwrap();

        assert_eq!(stage.friendly_tag().as_deref(), Some("one"));
    }

    #[test]
    fn test_transitions() {
        let stage = Stage::new("app", "");
        assert_eq!(stage.status(), StageStatus::Initialized);

        let err = stage.transition(StageStatus::Built).unwrap_err();
        assert_eq!(
            err.to_string(),
            "image for stage 'app' (hash: '') has an invalid status: initialized"
        );

        stage.transition(StageStatus::Absent).unwrap();
        stage.transition(StageStatus::Built).unwrap();
        assert_eq!(stage.status(), StageStatus::Built);
    }

    #[tokio::test]
    async fn test_write_build_files() {
        let env = Env::new();
        let stage = Stage::new("app", "# DockerIgnore node_modules\nFROM scratch\n")
            .with_ignore_patterns(vec!["*.log".to_string()]);
        env.render(&stage).await.unwrap();

        let files = stage.write_build_files().await.unwrap();

        assert_eq!(
            fs::read_to_string(files.build_file()).unwrap(),
            "# DockerIgnore node_modules\nFROM scratch\n"
        );
        assert_eq!(
            fs::read_to_string(files.ignore_file()).unwrap(),
            "*.log\n.dockerignore\nnode_modules\n"
        );

        let dir = files.build_file().parent().unwrap().to_path_buf();
        drop(files);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_build_calls_engine() {
        let env = Env::new();
        let stage = Stage::new("empty", "");
        env.render(&stage).await.unwrap();
        stage.set_image_urls("final-image", "final-image");

        let engine = FakeEngine::new();
        stage.build(&engine).await.unwrap();

        assert_eq!(engine.method_calls(), vec!["Build(final-image)"]);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let stage = Stage::new("app", "");
        stage.set_image_urls("target:app-1", "cache/app:app-1");

        let snapshot = stage.snapshot();
        assert_eq!(snapshot.name, "app");
        assert_eq!(snapshot.status, StageStatus::Initialized);
        assert_eq!(snapshot.image, "target:app-1");
        assert_eq!(snapshot.source_image, "cache/app:app-1");
        assert_eq!(snapshot.content_hash, None);
    }
}
