//! Builder directories for tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::definition::BuilderDefinition;
use crate::stage::BUILD_FILE_NAME;

/// A builder and an empty local context in a temporary directory.
#[derive(Debug)]
pub struct BuilderFixture {
    name: String,
    root: TempDir,
}

impl BuilderFixture {
    /// Creates a builder named `name` with one stage per `(stage, template)`.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the files.
    pub fn new(name: impl Into<String>, stages: &[(&str, &str)]) -> io::Result<Self> {
        let fixture = Self {
            name: name.into(),
            root: tempfile::Builder::new().prefix("image-builder-fixture-").tempdir()?,
        };
        fs::create_dir_all(fixture.builder_path())?;
        fs::create_dir_all(fixture.context_path())?;
        for (stage, template) in stages {
            fixture.add_stage(stage, template)?;
        }
        Ok(fixture)
    }

    /// Adds or replaces a stage.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the files.
    pub fn add_stage(&self, stage: &str, template: &str) -> io::Result<()> {
        let dir = self.builder_path().join(stage);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(BUILD_FILE_NAME), template)
    }

    /// Writes a file into the local context.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the file.
    pub fn add_context_file(&self, relative: &str, content: &str) -> io::Result<()> {
        let path = self.context_path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    /// Returns the builder name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the builder directory.
    #[must_use]
    pub fn builder_path(&self) -> PathBuf {
        self.root.path().join("builder")
    }

    /// Returns the local context directory.
    #[must_use]
    pub fn context_path(&self) -> PathBuf {
        self.root.path().join("context")
    }

    /// Returns the root of the fixture.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Returns the definition of the builder.
    #[must_use]
    pub fn definition(&self) -> BuilderDefinition {
        BuilderDefinition::from_path(&self.name, self.builder_path())
    }

    /// A stage referencing itself.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the files.
    pub fn self_reference() -> io::Result<Self> {
        Self::new("self-reference", &[("1", "FROM {{ BuilderStage \"1\" }}\n")])
    }

    /// Two stages referencing each other.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the files.
    pub fn circular_reference() -> io::Result<Self> {
        Self::new(
            "circular-reference",
            &[
                ("1", "FROM {{ BuilderStage \"2\" }}\n"),
                ("2", "FROM {{ BuilderStage \"1\" }}\n"),
            ],
        )
    }

    /// Five stages where `1` depends on everything else and `4` and `5`
    /// have identical templates.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the files.
    pub fn complex() -> io::Result<Self> {
        Self::new(
            "complex",
            &[
                (
                    "1",
                    "FROM {{ BuilderStage \"2\" }}\nCOPY --from={{ BuilderStage \"3\" }} /opt /opt\n",
                ),
                ("2", "FROM {{ BuilderStage \"4\" }}\nRUN make\n"),
                (
                    "3",
                    "FROM {{ BuilderStage \"4\" }}\nCOPY --from={{ BuilderStage \"5\" }} /lib /lib\n",
                ),
                ("4", "FROM alpine:3.19\nRUN apk add build-base\n"),
                ("5", "FROM alpine:3.19\nRUN apk add build-base\n"),
            ],
        )
    }

    /// A `final` stage fed by two independent chains of two stages.
    ///
    /// # Errors
    ///
    /// Returns IO errors from creating the files.
    pub fn concurrency() -> io::Result<Self> {
        Self::new(
            "concurrency",
            &[
                (
                    "final",
                    "FROM {{ BuilderStage \"parallel-1-2\" }}\nCOPY --from={{ BuilderStage \"parallel-2-2\" }} /out /out\n",
                ),
                ("parallel-1-1", "FROM alpine:3.19\nRUN echo chain\n"),
                ("parallel-1-2", "FROM {{ BuilderStage \"parallel-1-1\" }}\nRUN echo one\n"),
                ("parallel-2-1", "FROM alpine:3.19\nRUN echo chain\n"),
                ("parallel-2-2", "FROM {{ BuilderStage \"parallel-2-1\" }}\nRUN echo two\n"),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixture_layout() {
        let fixture = BuilderFixture::complex().unwrap();
        let definition = fixture.definition();

        assert_eq!(definition.name(), "complex");
        assert_eq!(definition.stages().unwrap(), vec!["1", "2", "3", "4", "5"]);
        assert!(fixture.context_path().is_dir());
    }

    #[test]
    fn test_context_files() {
        let fixture = BuilderFixture::new("app", &[]).unwrap();
        fixture.add_context_file("src/main.rs", "fn main() {}").unwrap();

        assert!(fixture.context_path().join("src/main.rs").is_file());
    }
}
