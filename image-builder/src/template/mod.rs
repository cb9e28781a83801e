//! Stage templates.
//!
//! A stage template is a Dockerfile with embedded `{{ ... }}` actions.
//! Actions call functions from a [`FunctionTable`]; the special
//! [`BUILDER_STAGE`] function resolves another stage of the same builder
//! through a [`StageResolver`] and records it as a dependency. Comment
//! directives in the rendered output (see [`Directives`]) carry metadata
//! about tagging and the build context.

mod directives;
mod expr;
mod functions;
mod renderer;

pub use directives::{Directives, DOCKER_IGNORE, FRIENDLY_TAG, TAG_ALIAS, USE_BUILDER_CONTEXT};
pub use functions::{
    Concat, ExternalImage, File, FunctionContext, FunctionTable, GitCommitShort, HasFile,
    MandatoryParameter, Parameter, TemplateFunction,
};
pub use renderer::{RenderedTemplate, StageResolver, TemplateRenderer, BUILDER_STAGE};
