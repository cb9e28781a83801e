//! Builder definitions on the filesystem.
//!
//! A builder is a directory where every subdirectory holding a
//! `Dockerfile` template is a stage named after the subdirectory.

use crate::errors::{DefinitionError, Result};
use crate::stage::BUILD_FILE_NAME;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A builder directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderDefinition {
    name: String,
    path: PathBuf,
}

impl BuilderDefinition {
    /// Creates a definition without checking the directory.
    #[must_use]
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Creates a definition and checks that it contains stages.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::NotFound`] if the directory does not exist
    /// and [`DefinitionError::NoStages`] if it holds no stage.
    pub fn from_location(name: impl Into<String>, location: impl Into<PathBuf>) -> Result<Self> {
        let definition = Self::from_path(name, location);
        if !definition.path.is_dir() {
            return Err(DefinitionError::NotFound {
                builder: definition.name,
                location: definition.path.display().to_string(),
            }
            .into());
        }
        definition.check_validity()?;
        Ok(definition)
    }

    /// Returns the builder name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the builder directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stage names, sorted.
    ///
    /// # Errors
    ///
    /// Returns IO errors from reading the builder directory.
    pub fn stages(&self) -> Result<Vec<String>> {
        let mut stages = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(BUILD_FILE_NAME).is_file() {
                stages.push(entry.file_name().to_string_lossy().into_owned());
            } else {
                debug!(dir = %entry.path().display(), "Skipping directory without template");
            }
        }
        stages.sort();
        Ok(stages)
    }

    /// Fails if the builder holds no stage.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::NoStages`] and IO errors.
    pub fn check_validity(&self) -> Result<()> {
        if self.stages()?.is_empty() {
            return Err(DefinitionError::NoStages {
                builder: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Returns the directory of a stage.
    #[must_use]
    pub fn stage_directory(&self, stage: &str) -> PathBuf {
        self.path.join(stage)
    }

    /// Returns the template path of a stage.
    #[must_use]
    pub fn stage_template(&self, stage: &str) -> PathBuf {
        self.stage_directory(stage).join(BUILD_FILE_NAME)
    }

    /// Reads the template of a stage.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::MissingTemplate`] if it cannot be read.
    pub async fn read_template(&self, stage: &str) -> Result<String> {
        let path = self.stage_template(stage);
        tokio::fs::read_to_string(&path).await.map_err(|err| {
            DefinitionError::MissingTemplate {
                stage: stage.to_string(),
                path: path.display().to_string(),
                reason: err.to_string(),
            }
            .into()
        })
    }
}
