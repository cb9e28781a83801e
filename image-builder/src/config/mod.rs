//! Build configuration and invocation options.

mod build_configuration;
mod options;

pub use build_configuration::{
    BuildConfiguration, BuilderSettings, SpecBag, SpecValue, DOCKER_IGNORES_ATTRIBUTE,
};
pub use options::BuildOptions;
