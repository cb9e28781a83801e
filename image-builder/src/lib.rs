//! # Image Builder
//!
//! Builds container images from builders: directories of templated build
//! files, one per stage, where stages reference each other's images.
//!
//! The crate provides:
//!
//! - **Templating**: stage templates with configuration lookups, file reads
//!   and references to other stages
//! - **Content addressing**: a stage image is tagged with a fingerprint of
//!   its rendered template and build context, so unchanged stages are reused
//! - **Concurrent builds**: dependencies are built or pulled in parallel,
//!   each stage at most once, bounded by build and pull slots
//! - **Pluggable collaborators**: container engines and registries sit
//!   behind async traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use image_builder::prelude::*;
//!
//! let definition = BuilderDefinition::from_location("ruby", "/builders/ruby")?;
//! let build = Build::builder(definition, engine, registry)
//!     .with_target_image("registry.local/my-app")
//!     .with_options(BuildOptions::new().with_build_concurrency(4))
//!     .finish();
//!
//! let stages = build.build_stages(&["runtime"]).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod build;
pub mod cancellation;
pub mod config;
pub mod definition;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod observability;
pub mod registry;
pub mod stage;
pub mod template;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::build::{Build, BuildBuilder, BuildReport};
    pub use crate::cancellation::{CancellationToken, TaskGroup};
    pub use crate::config::{BuildConfiguration, BuildOptions, SpecValue};
    pub use crate::definition::BuilderDefinition;
    pub use crate::engine::{BuildAndPush, BuildEngine};
    pub use crate::errors::{
        CycleDetectedError, DefinitionError, EngineError, ImageBuilderError, RegistryError,
        Result, TemplateError,
    };
    pub use crate::executor::{CommandExecutor, ProcessExecutor};
    pub use crate::fingerprint::Fingerprinter;
    pub use crate::graph::StageGraph;
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::registry::Registry;
    pub use crate::stage::{Stage, StageStatus};
    pub use crate::template::{FunctionTable, TemplateFunction, TemplateRenderer};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_exposes_defaults() {
        assert_eq!(BuildOptions::default().build_concurrency, 1);
        assert_eq!(StageStatus::default(), StageStatus::Initialized);
    }
}
