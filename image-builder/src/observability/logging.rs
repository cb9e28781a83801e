//! Logging setup.

use crate::errors::{ImageBuilderError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// How log records are filtered and formatted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or
    /// `image_builder=debug`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit one JSON object per record.
    #[serde(default)]
    pub json: bool,
    /// Include the module path of each record.
    #[serde(default)]
    pub with_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Enables or disables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Enables or disables module paths in records.
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Builds the filter: `RUST_LOG` when set, the configured level otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured level is not a valid directive.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level).map_err(|err| {
            ImageBuilderError::Internal(format!("invalid log level '{}': {err}", self.level))
        })
    }
}

/// Installs the global subscriber writing to stderr.
///
/// # Errors
///
/// Returns an error for an invalid level or when a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_target(config.with_target)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|err| ImageBuilderError::Internal(format!("failed to install logging: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: LoggingConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert_eq!(config, LoggingConfig::new().with_json(true));
    }

    #[test]
    fn test_builder_setters() {
        let config = LoggingConfig::new()
            .with_level("image_builder=debug")
            .with_target(true);
        assert_eq!(config.level, "image_builder=debug");
        assert!(config.with_target);
    }

    #[test]
    fn test_second_install_fails() {
        let config = LoggingConfig::new().with_level("warn");
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
