//! Build coordination.
//!
//! A [`Build`] owns every stage of one builder for one invocation. It
//! prepares stages on demand while their templates render, then builds the
//! requested stages, fanning out over their dependencies. Each stage is
//! worked on under its own named lock so that concurrent requests for the
//! same stage build it at most once.

use super::locks::NamedLocks;
use super::summary;
use crate::cancellation::{CancellationToken, TaskGroup};
use crate::config::{BuildConfiguration, BuildOptions};
use crate::definition::BuilderDefinition;
use crate::engine::BuildEngine;
use crate::errors::{CycleDetectedError, ImageBuilderError, Result};
use crate::executor::{CommandExecutor, ProcessExecutor};
use crate::fingerprint::Fingerprinter;
use crate::graph::StageGraph;
use crate::observability::StageTimer;
use crate::registry::Registry;
use crate::stage::{Stage, StageSnapshot, StageStatus};
use crate::template::{FunctionContext, StageResolver, TemplateRenderer};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A serializable view of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// The build identifier.
    pub build_id: Uuid,
    /// Every known stage, sorted by name.
    pub stages: Vec<StageSnapshot>,
}

/// Builder for a [`Build`].
pub struct BuildBuilder {
    definition: BuilderDefinition,
    engine: Arc<dyn BuildEngine>,
    registry: Arc<dyn Registry>,
    configuration: BuildConfiguration,
    options: BuildOptions,
    target_image: Option<String>,
    local_context: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    renderer: TemplateRenderer,
    fingerprinter: Fingerprinter,
}

impl BuildBuilder {
    /// Starts a build of `definition` with the given collaborators.
    #[must_use]
    pub fn new(
        definition: BuilderDefinition,
        engine: Arc<dyn BuildEngine>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            definition,
            engine,
            registry,
            configuration: BuildConfiguration::default(),
            options: BuildOptions::default(),
            target_image: None,
            local_context: PathBuf::from("."),
            executor: Arc::new(ProcessExecutor),
            renderer: TemplateRenderer::default(),
            fingerprinter: Fingerprinter::default(),
        }
    }

    /// Sets the build configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: BuildConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Sets the build options.
    #[must_use]
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the repository stage images are tagged into.
    ///
    /// Defaults to the builder name.
    #[must_use]
    pub fn with_target_image(mut self, target_image: impl Into<String>) -> Self {
        self.target_image = Some(target_image.into());
        self
    }

    /// Sets the directory the build was invoked from.
    #[must_use]
    pub fn with_local_context(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_context = dir.into();
        self
    }

    /// Sets the executor used by template functions.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the template renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Sets the fingerprinter.
    #[must_use]
    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Creates the build.
    #[must_use]
    pub fn finish(self) -> Build {
        let options = self.options.normalized();
        let target_image = self
            .target_image
            .unwrap_or_else(|| self.definition.name().to_string());

        Build {
            inner: Arc::new(BuildInner {
                id: Uuid::new_v4(),
                build_slots: Semaphore::new(options.build_concurrency),
                pull_slots: Semaphore::new(options.pull_concurrency),
                configuration: self.configuration,
                options,
                definition: self.definition,
                target_image,
                local_context: self.local_context,
                engine: self.engine,
                registry: self.registry,
                executor: self.executor,
                renderer: self.renderer,
                fingerprinter: self.fingerprinter,
                stages: DashMap::new(),
                locks: NamedLocks::new(),
                preparation: tokio::sync::Mutex::new(()),
                preparing: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }
}

impl std::fmt::Debug for BuildBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildBuilder")
            .field("definition", &self.definition)
            .field("engine", &self.engine.name())
            .field("options", &self.options)
            .field("target_image", &self.target_image)
            .finish_non_exhaustive()
    }
}

/// One invocation over one builder.
///
/// Cloning is cheap and every clone shares the same stages.
#[derive(Clone)]
pub struct Build {
    inner: Arc<BuildInner>,
}

struct BuildInner {
    id: Uuid,
    configuration: BuildConfiguration,
    options: BuildOptions,
    definition: BuilderDefinition,
    target_image: String,
    local_context: PathBuf,
    engine: Arc<dyn BuildEngine>,
    registry: Arc<dyn Registry>,
    executor: Arc<dyn CommandExecutor>,
    renderer: TemplateRenderer,
    fingerprinter: Fingerprinter,
    stages: DashMap<String, Arc<Stage>>,
    locks: NamedLocks,
    build_slots: Semaphore,
    pull_slots: Semaphore,
    /// Held for a whole preparation pass.
    preparation: tokio::sync::Mutex<()>,
    /// Stages whose preparation is in progress, outermost first.
    preparing: parking_lot::Mutex<Vec<String>>,
}

impl Build {
    /// Returns a builder for a build of `definition`.
    #[must_use]
    pub fn builder(
        definition: BuilderDefinition,
        engine: Arc<dyn BuildEngine>,
        registry: Arc<dyn Registry>,
    ) -> BuildBuilder {
        BuildBuilder::new(definition, engine, registry)
    }

    /// Returns the build identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the options in effect.
    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.inner.options
    }

    /// Returns the target repository.
    #[must_use]
    pub fn target_image(&self) -> &str {
        &self.inner.target_image
    }

    /// Returns a prepared stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<Arc<Stage>> {
        self.inner.stage(name)
    }

    /// Returns every known stage, sorted by name.
    #[must_use]
    pub fn stages(&self) -> Vec<Arc<Stage>> {
        self.inner.sorted_stages()
    }

    /// Prepares `names` and everything they reference.
    ///
    /// A preparation failure leaves no trace of the failing stages.
    ///
    /// # Errors
    ///
    /// Returns definition, cycle, render and fingerprint errors.
    pub async fn prepare_stages<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<Stage>>> {
        let span = info_span!("prepare", build_id = %self.inner.id);
        self.inner.prepare_stages(names).instrument(span).await
    }

    /// Prepares and builds `names`.
    ///
    /// The first failure stops work that has not started yet. Engine calls
    /// already running are awaited.
    ///
    /// # Errors
    ///
    /// Returns preparation errors and the first build error.
    pub async fn build_stages<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<Stage>>> {
        let span = info_span!("build", build_id = %self.inner.id);
        let inner = Arc::clone(&self.inner);
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();

        async move {
            let stages = inner.prepare_stages(&names).await?;
            if inner.options.dry_run {
                info!(stages = stages.len(), "Dry run, skipping the build");
                return Ok(stages);
            }

            let group = TaskGroup::new();
            let cancel = Arc::clone(group.cancel_token());
            for name in names {
                let stage_build = Arc::clone(&inner).build_stage(name.clone(), Arc::clone(&cancel));
                group.spawn(&name, stage_build);
            }
            group.wait().await?;

            info!("Build finished");
            Ok(inner.sorted_stages())
        }
        .instrument(span)
        .await
    }

    /// Returns the order dependencies must be built in for `names`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::UnknownStage`](crate::errors::DefinitionError)
    /// for stages that were not prepared.
    pub fn build_order<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        let mut graph = StageGraph::new();
        for stage in self.inner.sorted_stages() {
            graph.add_node(stage.name(), stage.required_stages());
        }
        graph.resolve_order(names)
    }

    /// Returns a serializable view of every known stage.
    #[must_use]
    pub fn report(&self) -> BuildReport {
        BuildReport {
            build_id: self.inner.id,
            stages: self.stages().iter().map(|s| s.snapshot()).collect(),
        }
    }

    /// Returns the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns serialization errors.
    pub fn report_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.report())?)
    }

    /// Writes `stage|image` lines for every known stage to `path`.
    ///
    /// # Errors
    ///
    /// Returns IO errors.
    pub async fn write_summary(&self, path: &Path) -> Result<()> {
        let entries: Vec<(String, String)> = self
            .stages()
            .iter()
            .map(|s| (s.name().to_string(), s.image_url()))
            .collect();
        summary::write_summary(path, entries.iter().map(|(s, i)| (s.as_str(), i.as_str()))).await?;
        debug!(path = %path.display(), "Summary written");
        Ok(())
    }
}

impl std::fmt::Debug for Build {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Build")
            .field("id", &self.inner.id)
            .field("builder", &self.inner.definition.name())
            .field("target_image", &self.inner.target_image)
            .field("stages", &self.inner.stages.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageResolver for BuildInner {
    async fn resolve_stage(&self, stage: &str) -> Result<String> {
        let stage = self.prepare_stage(stage).await?;
        Ok(stage.image_url())
    }
}

impl BuildInner {
    fn stage(&self, name: &str) -> Option<Arc<Stage>> {
        self.stages.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn sorted_stages(&self) -> Vec<Arc<Stage>> {
        let mut stages: Vec<Arc<Stage>> =
            self.stages.iter().map(|entry| Arc::clone(entry.value())).collect();
        stages.sort_by(|a, b| a.name().cmp(b.name()));
        stages
    }

    fn builder_name(&self) -> &str {
        match self.configuration.builder_name() {
            "" => self.definition.name(),
            name => name,
        }
    }

    async fn prepare_stages<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<Stage>>> {
        let _preparation = self.preparation.lock().await;

        for name in names {
            self.prepare_stage(name.as_ref()).await?;
        }

        // References resolved while a stage was still unknown are settled now.
        for stage in self.sorted_stages() {
            self.render_stage(&stage).await?;
        }

        Ok(self.sorted_stages())
    }

    async fn prepare_stage(&self, name: &str) -> Result<Arc<Stage>> {
        if let Some(existing) = self.known_stage(name)? {
            return Ok(existing);
        }

        let template = self.definition.read_template(name).await?;
        let stage = Arc::new(
            Stage::new(name, template)
                .with_stage_directory(self.definition.stage_directory(name))
                .with_local_context(self.local_context.clone())
                .with_ignore_patterns(self.configuration.ignore_patterns(name)),
        );

        match self.stages.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let existing = Arc::clone(entry.get());
                drop(entry);
                return self.known_stage(name).map(|known| known.unwrap_or(existing));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&stage));
            }
        }

        self.preparing.lock().push(name.to_string());
        let result = self.prepare_new_stage(&stage).await;
        self.preparing.lock().pop();

        if let Err(err) = result {
            self.stages.remove(name);
            return Err(ImageBuilderError::stage(name, "preparing", err));
        }
        Ok(stage)
    }

    /// Returns a stage that finished preparation, or a cycle error if the
    /// stage is still being prepared.
    fn known_stage(&self, name: &str) -> Result<Option<Arc<Stage>>> {
        let Some(stage) = self.stage(name) else {
            return Ok(None);
        };
        if stage.status() != StageStatus::Initialized {
            return Ok(Some(stage));
        }

        let preparing = self.preparing.lock();
        let start = preparing.iter().position(|p| p == name).unwrap_or(0);
        let mut path = preparing[start..].to_vec();
        path.push(name.to_string());
        Err(CycleDetectedError::new(name, path).into())
    }

    async fn prepare_new_stage(&self, stage: &Stage) -> Result<()> {
        self.render_stage(stage).await?;
        let hash = stage.compute_content_hash(&self.fingerprinter).await?;
        let tag = stage.image_tag()?;
        let target = format!("{}:{}-{tag}", self.target_image, stage.name());
        stage.set_image_urls(target.clone(), target);

        let cached = if self.options.cache_image_pull {
            self.find_existing_image(stage, &tag).await
        } else {
            None
        };

        match cached {
            Some(source) => {
                info!(stage = %stage.name(), hash = %hash, source = %source, "Stage image found");
                stage.set_source_image_url(source);
                stage.transition(StageStatus::Cached)
            }
            None => {
                info!(stage = %stage.name(), hash = %hash, image = %stage.image_url(), "Stage image must be built");
                stage.transition(StageStatus::Absent)
            }
        }
    }

    async fn render_stage(&self, stage: &Stage) -> Result<()> {
        let context_dir = stage.build_context();
        let ctx = FunctionContext {
            stage: stage.name(),
            configuration: &self.configuration,
            context_dir: &context_dir,
            executor: self.executor.as_ref(),
            registry: self.registry.as_ref(),
        };
        stage.render(&self.renderer, &ctx, self).await
    }

    /// Looks the stage image up in the builder cache, then in the target
    /// repository.
    async fn find_existing_image(&self, stage: &Stage, tag: &str) -> Option<String> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(cache) = self.configuration.builder_cache() {
            candidates.push(format!("{cache}/{}:{}-{tag}", self.builder_name(), stage.name()));
        }
        candidates.push(stage.image_url());

        for candidate in candidates {
            match self.registry.image_exists(&candidate).await {
                Ok(true) => return Some(candidate),
                Ok(false) => debug!(stage = %stage.name(), image = %candidate, "Image not found"),
                Err(err) => {
                    warn!(stage = %stage.name(), image = %candidate, error = %err, "Image lookup failed, assuming absent");
                }
            }
        }
        None
    }

    fn build_stage(
        self: Arc<Self>,
        name: String,
        cancel: Arc<CancellationToken>,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            let stage = self
                .stage(&name)
                .ok_or_else(|| ImageBuilderError::NotPrepared(name.clone()))?;
            let _guard = self.locks.lock(&name).await;

            match stage.status() {
                StageStatus::Cached | StageStatus::Pulled | StageStatus::Built => {
                    debug!(stage = %name, status = %stage.status(), "Stage already present");
                    return Ok(());
                }
                StageStatus::Initialized => {
                    return Err(ImageBuilderError::InvalidStatus {
                        stage: name,
                        hash: stage.content_hash().unwrap_or_default(),
                        status: StageStatus::Initialized.to_string(),
                    });
                }
                StageStatus::Absent => {}
            }

            self.build_absent_stage(&stage, &cancel)
                .await
                .map_err(|err| ImageBuilderError::stage(&name, "building", err))?;

            if self.options.cache_image_push {
                self.publish(&stage)
                    .await
                    .map_err(|err| ImageBuilderError::stage(&name, "pushing", err))?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn build_absent_stage(
        self: &Arc<Self>,
        stage: &Stage,
        cancel: &Arc<CancellationToken>,
    ) -> Result<()> {
        cancel.check()?;
        self.ensure_dependencies(stage, cancel).await?;

        let _slot = acquire(&self.build_slots).await?;
        cancel.check()?;

        let timer = StageTimer::start(stage.name(), "build");
        let fused = if self.options.cache_image_push {
            self.engine.as_build_and_push()
        } else {
            None
        };
        match fused {
            Some(engine) => stage.build_and_push(engine).await?,
            None => stage.build(self.engine.as_ref()).await?,
        }
        timer.finish();

        stage.transition(StageStatus::Built)
    }

    async fn ensure_dependencies(
        self: &Arc<Self>,
        stage: &Stage,
        cancel: &Arc<CancellationToken>,
    ) -> Result<()> {
        let dependencies = stage.required_stages();
        if dependencies.is_empty() {
            return Ok(());
        }

        let group = TaskGroup::with_token(Arc::clone(cancel));
        for dependency in dependencies {
            let task = Arc::clone(self).ensure_dependency_presence(dependency.clone(), Arc::clone(cancel));
            group.spawn(&dependency, task);
        }
        group.wait().await
    }

    async fn ensure_dependency_presence(
        self: Arc<Self>,
        dependency: String,
        cancel: Arc<CancellationToken>,
    ) -> Result<()> {
        let stage = self
            .stage(&dependency)
            .ok_or_else(|| ImageBuilderError::NotPrepared(dependency.clone()))?;

        if stage.status() == StageStatus::Cached {
            return self
                .pull_dependency(&stage, &cancel)
                .await
                .map_err(|err| ImageBuilderError::stage(&dependency, "pulling", err));
        }
        self.build_stage(dependency, cancel).await
    }

    async fn pull_dependency(&self, stage: &Stage, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.locks.lock(stage.name()).await;
        if stage.status() != StageStatus::Cached {
            debug!(stage = %stage.name(), status = %stage.status(), "Dependency already present");
            return Ok(());
        }

        let _slot = acquire(&self.pull_slots).await?;
        cancel.check()?;

        let source = stage.source_image_url();
        let target = stage.image_url();
        let timer = StageTimer::start(stage.name(), "pull");
        self.engine.pull(&source).await?;
        self.engine.tag(&source, &target).await?;
        timer.finish();

        stage.transition(StageStatus::Pulled)
    }

    async fn publish(&self, stage: &Stage) -> Result<()> {
        let image = stage.image_url();
        if self.engine.as_build_and_push().is_none() {
            let timer = StageTimer::start(stage.name(), "push");
            self.engine.push(&image).await?;
            timer.finish();
        }

        for alias in stage.tag_aliases() {
            self.registry.tag_image(&image, &alias).await?;
            info!(stage = %stage.name(), image = %image, alias = %alias, "Alias applied");
        }
        Ok(())
    }
}

async fn acquire(slots: &Semaphore) -> Result<SemaphorePermit<'_>> {
    slots
        .acquire()
        .await
        .map_err(|err| ImageBuilderError::Internal(format!("slot acquisition failed: {err}")))
}
