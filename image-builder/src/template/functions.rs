//! Functions callable from stage templates.

use crate::config::BuildConfiguration;
use crate::errors::{ImageBuilderError, Result, TemplateError};
use crate::executor::{CommandExecutor, CommandSpec};
use crate::registry::Registry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Everything a template function may look at while a stage renders.
#[derive(Clone, Copy)]
pub struct FunctionContext<'a> {
    /// The stage being rendered.
    pub stage: &'a str,
    /// The build configuration.
    pub configuration: &'a BuildConfiguration,
    /// The directory relative paths are resolved against.
    pub context_dir: &'a Path,
    /// Runs external commands.
    pub executor: &'a dyn CommandExecutor,
    /// Answers registry queries.
    pub registry: &'a dyn Registry,
}

impl FunctionContext<'_> {
    /// Creates a template error attributed to the current stage.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> ImageBuilderError {
        TemplateError::new(self.stage, message).into()
    }

    fn check_arity(&self, name: &str, args: &[String], min: usize, max: usize) -> Result<()> {
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            };
            return Err(self.error(format!(
                "wrong number of args for {name}: want {expected} got {}",
                args.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for FunctionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionContext")
            .field("stage", &self.stage)
            .field("context_dir", &self.context_dir)
            .finish_non_exhaustive()
    }
}

/// A function available inside `{{ ... }}` actions.
#[async_trait]
pub trait TemplateFunction: Send + Sync {
    /// Evaluates the function with already evaluated arguments.
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String>;
}

/// Named template functions.
#[derive(Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, Arc<dyn TemplateFunction>>,
}

impl FunctionTable {
    /// Creates a table without any function.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a table with the built-in functions.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::empty()
            .with_function("Parameter", Parameter)
            .with_function("MandatoryParameter", MandatoryParameter)
            .with_function("Concat", Concat)
            .with_function("File", File)
            .with_function("HasFile", HasFile)
            .with_function("GitCommitShort", GitCommitShort)
            .with_function("ExternalImage", ExternalImage)
    }

    /// Adds or replaces a function.
    #[must_use]
    pub fn with_function(mut self, name: impl Into<String>, function: impl TemplateFunction + 'static) -> Self {
        self.register(name, Arc::new(function));
        self
    }

    /// Adds or replaces a function.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn TemplateFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Looks a function up.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TemplateFunction>> {
        self.functions.get(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("functions", &self.names())
            .finish()
    }
}

/// `Parameter name [default]`: a spec attribute, the default, or "".
#[derive(Debug, Clone, Copy, Default)]
pub struct Parameter;

#[async_trait]
impl TemplateFunction for Parameter {
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        ctx.check_arity("Parameter", args, 1, 2)?;
        let name = &args[0];

        if !name.is_empty() {
            if let Some(value) = ctx.configuration.spec_attribute(ctx.stage, name) {
                return Ok(value.to_string());
            }
        }
        Ok(args.get(1).cloned().unwrap_or_default())
    }
}

/// `MandatoryParameter name`: a spec attribute, or an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct MandatoryParameter;

#[async_trait]
impl TemplateFunction for MandatoryParameter {
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        ctx.check_arity("MandatoryParameter", args, 1, 1)?;
        let name = &args[0];

        ctx.configuration
            .spec_attribute(ctx.stage, name)
            .map(ToString::to_string)
            .ok_or_else(|| {
                ctx.error(format!(
                    "could not find mandatory parameter '{name}' in [{}]",
                    ctx.configuration.spec_attribute_names(ctx.stage).join(" ")
                ))
            })
    }
}

/// `Concat args...`: the arguments joined without separator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Concat;

#[async_trait]
impl TemplateFunction for Concat {
    async fn call(&self, _ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        Ok(args.concat())
    }
}

/// `File path`: the content of a file of the build context, newlines removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct File;

#[async_trait]
impl TemplateFunction for File {
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        ctx.check_arity("File", args, 1, 1)?;
        let path = ctx.context_dir.join(&args[0]);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ctx.error(format!("error reading '{}': {err}", path.display())))?;
        Ok(content.replace(['\r', '\n'], ""))
    }
}

/// `HasFile path`: "true" if the path exists in the build context.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasFile;

#[async_trait]
impl TemplateFunction for HasFile {
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        ctx.check_arity("HasFile", args, 1, 1)?;
        let exists = tokio::fs::metadata(ctx.context_dir.join(&args[0])).await.is_ok();
        Ok(exists.to_string())
    }
}

/// `GitCommitShort`: the commit checked out in the build context.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCommitShort;

#[async_trait]
impl TemplateFunction for GitCommitShort {
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        ctx.check_arity("GitCommitShort", args, 0, 0)?;
        let command = CommandSpec::new("git")
            .args(["rev-parse", "HEAD"])
            .dir(ctx.context_dir);

        let output = ctx
            .executor
            .run(&command)
            .await
            .map_err(|err| ctx.error(format!("error running '{}': {err}", command.display())))?;
        if !output.success {
            return Err(ctx.error(format!(
                "'{}' failed: {}",
                command.display(),
                output.combined().trim()
            )));
        }
        Ok(output.stdout.trim_end().to_string())
    }
}

/// `ExternalImage ref`: the reference pinned by digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalImage;

#[async_trait]
impl TemplateFunction for ExternalImage {
    async fn call(&self, ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
        ctx.check_arity("ExternalImage", args, 1, 1)?;
        let digest = ctx.registry.image_with_digest(&args[0]).await?;
        debug!(image = %args[0], digest = %digest, "Replacing ExternalImage");
        Ok(digest)
    }
}
