//! Error types for the image builder.
//!
//! Every failure path of preparation and build funnels into
//! [`ImageBuilderError`]. Errors raised while working on a particular stage
//! are wrapped with the stage name and the operation that failed, so the
//! message of a deeply nested failure reads like a path from the requested
//! stage down to the root cause.

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ImageBuilderError>;

/// The main error type for image builder operations.
#[derive(Debug, Error)]
pub enum ImageBuilderError {
    /// The builder definition is invalid or incomplete.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// A stage was re-entered while it was still being prepared.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A template could not be parsed or evaluated.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// A `BuilderStage` reference could not be resolved.
    #[error("cannot replace BuilderStage('{reference}') in stage '{stage}': {source}")]
    StageReference {
        /// The stage whose template holds the reference.
        stage: String,
        /// The referenced stage.
        reference: String,
        /// Why resolution failed.
        #[source]
        source: Box<ImageBuilderError>,
    },

    /// An ignore pattern could not be compiled.
    #[error("{0}")]
    Pattern(#[from] PatternError),

    /// An engine invocation failed.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A registry call failed.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A stage was found in a status that does not allow building it.
    #[error("image for stage '{stage}' (hash: '{hash}') has an invalid status: {status}")]
    InvalidStatus {
        /// The stage name.
        stage: String,
        /// The stage content hash, possibly empty.
        hash: String,
        /// The observed status.
        status: String,
    },

    /// A stage was requested for build without having been prepared.
    #[error("stage '{0}' was not prepared")]
    NotPrepared(String),

    /// An operation on a stage failed.
    #[error("error while {operation} stage '{stage}': {source}")]
    Stage {
        /// The stage name.
        stage: String,
        /// What was being done, e.g. "building".
        operation: String,
        /// The underlying failure.
        #[source]
        source: Box<ImageBuilderError>,
    },

    /// Work was skipped because a sibling task failed first.
    #[error("Build cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ImageBuilderError {
    /// Wraps an error with the stage it happened on and the failed operation.
    #[must_use]
    pub fn stage(stage: impl Into<String>, operation: impl Into<String>, source: Self) -> Self {
        Self::Stage {
            stage: stage.into(),
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Wraps a resolver failure raised while rendering `stage`.
    #[must_use]
    pub fn stage_reference(
        stage: impl Into<String>,
        reference: impl Into<String>,
        source: Self,
    ) -> Self {
        Self::StageReference {
            stage: stage.into(),
            reference: reference.into(),
            source: Box::new(source),
        }
    }

    /// Returns the cycle error buried in this error chain, if any.
    #[must_use]
    pub fn cycle(&self) -> Option<&CycleDetectedError> {
        match self {
            Self::CycleDetected(err) => Some(err),
            Self::StageReference { source, .. } | Self::Stage { source, .. } => source.cycle(),
            _ => None,
        }
    }

    /// Returns true if the error chain contains a dependency cycle.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        self.cycle().is_some()
    }

    /// Returns true if the error chain ends in a cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::StageReference { source, .. } | Self::Stage { source, .. } => {
                source.is_cancellation()
            }
            _ => false,
        }
    }
}

/// Errors about the builder definition itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    /// The builder contains no stage.
    #[error("No stages found for Builder '{builder}'")]
    NoStages {
        /// The builder name.
        builder: String,
    },

    /// The builder directory does not exist.
    #[error("Builder '{builder}' was not found at '{location}'")]
    NotFound {
        /// The builder name.
        builder: String,
        /// Where it was looked up.
        location: String,
    },

    /// A referenced stage has no template.
    #[error("failed to read the template of stage '{stage}' at '{path}': {reason}")]
    MissingTemplate {
        /// The stage name.
        stage: String,
        /// The expected template path.
        path: String,
        /// The underlying IO message.
        reason: String,
    },

    /// A stage name is referenced but unknown to the graph.
    #[error("stage '{stage}' is referenced but unknown")]
    UnknownStage {
        /// The missing stage name.
        stage: String,
    },
}

/// Error raised when a stage is re-entered while still being prepared.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct CycleDetectedError {
    /// The stage that was re-entered.
    pub stage: String,
    /// The chain of stages being prepared, ending with the re-entered one.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(stage: impl Into<String>, cycle_path: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            cycle_path,
        }
    }
}

impl fmt::Display for CycleDetectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' is already being built - possible loop in the stage dependencies",
            self.stage
        )?;
        if !self.cycle_path.is_empty() {
            write!(f, " ({})", self.cycle_path.join(" -> "))?;
        }
        Ok(())
    }
}

/// Error raised while parsing or evaluating a stage template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to render the template of stage '{stage}': {message}")]
pub struct TemplateError {
    /// The stage being rendered.
    pub stage: String,
    /// What went wrong.
    pub message: String,
}

impl TemplateError {
    /// Creates a new template error.
    #[must_use]
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Error raised when an ignore pattern is malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid ignore pattern '{pattern}': {reason}")]
pub struct PatternError {
    /// The offending pattern.
    pub pattern: String,
    /// Why it was rejected.
    pub reason: String,
}

impl PatternError {
    /// Creates a new pattern error.
    #[must_use]
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Error reported by a build engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{engine} {operation} of '{image}' failed: {message}")]
pub struct EngineError {
    /// The engine name.
    pub engine: String,
    /// The operation, e.g. "build" or "push".
    pub operation: String,
    /// The image reference involved.
    pub image: String,
    /// Engine output or reason.
    pub message: String,
}

impl EngineError {
    /// Creates a new engine error.
    #[must_use]
    pub fn new(
        engine: impl Into<String>,
        operation: impl Into<String>,
        image: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            engine: engine.into(),
            operation: operation.into(),
            image: image.into(),
            message: message.into(),
        }
    }
}

/// Error reported by a registry client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("registry {operation} of '{reference}' failed: {message}")]
pub struct RegistryError {
    /// The operation, e.g. "tag".
    pub operation: String,
    /// The image reference involved.
    pub reference: String,
    /// Reason.
    pub message: String,
}

impl RegistryError {
    /// Creates a new registry error.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        reference: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            reference: reference.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_mentions_loop() {
        let err = CycleDetectedError::new("1", vec!["1".to_string(), "2".to_string(), "1".to_string()]);
        let msg = err.to_string();

        assert!(msg.contains("possible loop in the stage dependencies"));
        assert!(msg.contains("1 -> 2 -> 1"));
    }

    #[test]
    fn test_cycle_found_through_wrapping() {
        let cycle = ImageBuilderError::from(CycleDetectedError::new("a", vec![]));
        let wrapped = ImageBuilderError::stage_reference(
            "b",
            "a",
            ImageBuilderError::stage_reference("a", "b", cycle),
        );

        assert!(wrapped.is_cycle());
        assert_eq!(wrapped.cycle().map(|c| c.stage.as_str()), Some("a"));
        assert!(wrapped.to_string().starts_with("cannot replace BuilderStage('a') in stage 'b'"));
    }

    #[test]
    fn test_stage_wrapping_message() {
        let err = ImageBuilderError::stage(
            "final",
            "building",
            EngineError::new("docker", "build", "img:final-1234", "exit status 1").into(),
        );

        assert_eq!(
            err.to_string(),
            "error while building stage 'final': docker build of 'img:final-1234' failed: exit status 1"
        );
        assert!(!err.is_cycle());
    }

    #[test]
    fn test_definition_error_messages() {
        let err = DefinitionError::NoStages {
            builder: "ruby".to_string(),
        };
        assert_eq!(err.to_string(), "No stages found for Builder 'ruby'");
    }
}
