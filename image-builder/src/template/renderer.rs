//! Template evaluation.

use super::expr::{self, Expr, Node};
use super::functions::{FunctionContext, FunctionTable};
use crate::errors::{ImageBuilderError, Result, TemplateError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

/// Name of the function referencing another stage of the builder.
pub const BUILDER_STAGE: &str = "BuilderStage";

/// Turns a stage name into the image reference of that stage.
///
/// Implementations may prepare the referenced stage on demand, which makes
/// rendering recursive.
#[async_trait]
pub trait StageResolver: Send + Sync {
    /// Returns the image reference of `stage`.
    async fn resolve_stage(&self, stage: &str) -> Result<String>;
}

/// The output of a render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedTemplate {
    /// The fully substituted build instructions.
    pub content: String,
    /// Referenced stages in order of first reference, without duplicates.
    pub dependencies: Vec<String>,
}

/// Evaluates stage templates with a table of functions.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    functions: FunctionTable,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(FunctionTable::with_builtins())
    }
}

impl TemplateRenderer {
    /// Creates a renderer using `functions`.
    #[must_use]
    pub fn new(functions: FunctionTable) -> Self {
        Self { functions }
    }

    /// Returns the function table.
    #[must_use]
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Renders `template` for the stage described by `ctx`.
    ///
    /// No lock is held while `resolver` runs, so the resolver may render
    /// other stages with this same renderer.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] for syntax errors and unknown functions,
    /// a stage reference error when `resolver` fails, and whatever a
    /// function call returns.
    pub async fn render(
        &self,
        template: &str,
        ctx: &FunctionContext<'_>,
        resolver: &dyn StageResolver,
    ) -> Result<RenderedTemplate> {
        let nodes = expr::parse(template).map_err(|err| ctx.error(err.to_string()))?;
        self.check_functions(&nodes, ctx)?;

        let mut rendered = RenderedTemplate::default();
        for node in &nodes {
            match node {
                Node::Text(text) => rendered.content.push_str(text),
                Node::Action { expr, line } => {
                    let value = self
                        .eval(expr, *line, ctx, resolver, &mut rendered.dependencies)
                        .await?;
                    rendered.content.push_str(&value);
                }
            }
        }

        Ok(rendered)
    }

    fn check_functions(&self, nodes: &[Node], ctx: &FunctionContext<'_>) -> Result<()> {
        fn visit(
            expr: &Expr,
            line: usize,
            functions: &FunctionTable,
            ctx: &FunctionContext<'_>,
        ) -> Result<()> {
            if let Expr::Call { name, args } = expr {
                if name != BUILDER_STAGE && functions.get(name).is_none() {
                    return Err(ctx.error(format!("line {line}: function \"{name}\" not defined")));
                }
                for arg in args {
                    visit(arg, line, functions, ctx)?;
                }
            }
            Ok(())
        }

        nodes.iter().try_for_each(|node| match node {
            Node::Action { expr, line } => visit(expr, *line, &self.functions, ctx),
            Node::Text(_) => Ok(()),
        })
    }

    fn eval<'a, 'c: 'a>(
        &'a self,
        expr: &'a Expr,
        line: usize,
        ctx: &'a FunctionContext<'c>,
        resolver: &'a dyn StageResolver,
        dependencies: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let (name, args) = match expr {
                Expr::Literal(value) => return Ok(value.clone()),
                Expr::Call { name, args } => (name, args),
            };

            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg, line, ctx, resolver, dependencies).await?);
            }

            if name == BUILDER_STAGE {
                return Self::builder_stage(&values, line, ctx, resolver, dependencies).await;
            }

            let function = self
                .functions
                .get(name)
                .ok_or_else(|| ctx.error(format!("line {line}: function \"{name}\" not defined")))?;

            function.call(ctx, &values).await.map_err(|err| match err {
                ImageBuilderError::Template(TemplateError { stage, message }) => {
                    TemplateError::new(stage, format!("line {line}: error calling {name}: {message}"))
                        .into()
                }
                other => other,
            })
        }
        .boxed()
    }

    async fn builder_stage(
        args: &[String],
        line: usize,
        ctx: &FunctionContext<'_>,
        resolver: &dyn StageResolver,
        dependencies: &mut Vec<String>,
    ) -> Result<String> {
        let [reference] = args else {
            return Err(ctx.error(format!(
                "line {line}: wrong number of args for {BUILDER_STAGE}: want 1 got {}",
                args.len()
            )));
        };

        if !dependencies.contains(reference) {
            dependencies.push(reference.clone());
        }

        let image = resolver
            .resolve_stage(reference)
            .await
            .map_err(|err| ImageBuilderError::stage_reference(ctx.stage, reference.as_str(), err))?;
        debug!(stage = %ctx.stage, reference = %reference, image = %image, "Replacing BuilderStage");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfiguration;
    use crate::errors::CycleDetectedError;
    use crate::registry::MockRegistry;
    use crate::template::TemplateFunction;
    use crate::testing::FakeExecutor;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MapResolver {
        images: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl MapResolver {
        fn with(mut self, stage: &str, image: &str) -> Self {
            self.images.insert(stage.to_string(), image.to_string());
            self
        }
    }

    #[async_trait]
    impl StageResolver for MapResolver {
        async fn resolve_stage(&self, stage: &str) -> Result<String> {
            self.calls.lock().push(stage.to_string());
            self.images
                .get(stage)
                .cloned()
                .ok_or_else(|| CycleDetectedError::new(stage, vec![stage.to_string()]).into())
        }
    }

    struct Shout;

    #[async_trait]
    impl TemplateFunction for Shout {
        async fn call(&self, _ctx: &FunctionContext<'_>, args: &[String]) -> Result<String> {
            Ok(args.concat().to_uppercase())
        }
    }

    struct Env {
        configuration: BuildConfiguration,
        executor: FakeExecutor,
        registry: MockRegistry,
        dir: PathBuf,
    }

    impl Env {
        fn new() -> Self {
            Self {
                configuration: BuildConfiguration::new().with_global_attribute("distro", "alpine"),
                executor: FakeExecutor::new(),
                registry: MockRegistry::new(),
                dir: PathBuf::from("."),
            }
        }

        fn ctx(&self) -> FunctionContext<'_> {
            FunctionContext {
                stage: "app",
                configuration: &self.configuration,
                context_dir: &self.dir,
                executor: &self.executor,
                registry: &self.registry,
            }
        }
    }

    #[tokio::test]
    async fn test_render_substitutes_stage_references() {
        let env = Env::new();
        let resolver = MapResolver::default()
            .with("base", "registry.local/app:base-1234abcd")
            .with("assets", "registry.local/app:assets-5678abcd");
        let template = "\
FROM {{ BuilderStage \"base\" }}
COPY --from={{ BuilderStage \"assets\" }} /out /out
COPY --from={{ BuilderStage \"base\" }} /etc /etc
";

        let rendered = TemplateRenderer::default()
            .render(template, &env.ctx(), &resolver)
            .await
            .unwrap();

        assert_eq!(
            rendered.content,
            "\
FROM registry.local/app:base-1234abcd
COPY --from=registry.local/app:assets-5678abcd /out /out
COPY --from=registry.local/app:base-1234abcd /etc /etc
"
        );
        assert_eq!(rendered.dependencies, vec!["base", "assets"]);
    }

    #[tokio::test]
    async fn test_render_nested_functions() {
        let env = Env::new();
        let rendered = TemplateRenderer::default()
            .render(
                "FROM {{ Concat (Parameter \"distro\") \":\" (Parameter \"tag\" \"3.19\") }}",
                &env.ctx(),
                &MapResolver::default(),
            )
            .await
            .unwrap();

        assert_eq!(rendered.content, "FROM alpine:3.19");
        assert!(rendered.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_custom_function_table() {
        let env = Env::new();
        let renderer = TemplateRenderer::new(FunctionTable::empty().with_function("Shout", Shout));

        let rendered = renderer
            .render("{{ Shout \"a\" \"b\" }}", &env.ctx(), &MapResolver::default())
            .await
            .unwrap();
        assert_eq!(rendered.content, "AB");

        let err = renderer
            .render("{{ Concat \"a\" }}", &env.ctx(), &MapResolver::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("function \"Concat\" not defined"));
    }

    #[tokio::test]
    async fn test_unknown_function_fails_before_resolving() {
        let env = Env::new();
        let resolver = MapResolver::default().with("base", "img");

        let err = TemplateRenderer::default()
            .render("FROM {{ BuilderStage \"base\" }}\n{{ Nope }}", &env.ctx(), &resolver)
            .await
            .unwrap_err();

        assert!(matches!(err, ImageBuilderError::Template(_)));
        assert!(err.to_string().contains("line 2: function \"Nope\" not defined"));
        assert!(resolver.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_resolver_error_is_wrapped() {
        let env = Env::new();

        let err = TemplateRenderer::default()
            .render("FROM {{ BuilderStage \"app\" }}", &env.ctx(), &MapResolver::default())
            .await
            .unwrap_err();

        assert!(err.is_cycle());
        assert!(err
            .to_string()
            .starts_with("cannot replace BuilderStage('app') in stage 'app'"));
    }

    #[tokio::test]
    async fn test_builder_stage_arity() {
        let env = Env::new();
        let err = TemplateRenderer::default()
            .render("{{ BuilderStage }}", &env.ctx(), &MapResolver::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("want 1 got 0"));
    }

    #[tokio::test]
    async fn test_function_errors_carry_line() {
        let env = Env::new();
        let err = TemplateRenderer::default()
            .render("\n\n{{ MandatoryParameter \"ruby\" }}", &env.ctx(), &MapResolver::default())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("line 3: error calling MandatoryParameter: could not find mandatory parameter 'ruby'"));
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let env = Env::new();
        let err = TemplateRenderer::default()
            .render("FROM {{ Parameter \"x\"", &env.ctx(), &MapResolver::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to render the template of stage 'app': line 1: unclosed action"
        );
    }
}
