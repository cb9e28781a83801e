//! Options controlling a build invocation.

use serde::{Deserialize, Serialize};

/// Options for a build invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Check registries for images that were already built.
    #[serde(default = "default_cache_image_pull")]
    pub cache_image_pull: bool,
    /// Push built stages so they can be reused.
    #[serde(default)]
    pub cache_image_push: bool,
    /// Stop after preparation without calling the engine.
    #[serde(default)]
    pub dry_run: bool,
    /// How many engine builds may run at the same time.
    #[serde(default = "default_build_concurrency")]
    pub build_concurrency: usize,
    /// How many dependency pulls may run at the same time.
    #[serde(default = "default_pull_concurrency")]
    pub pull_concurrency: usize,
}

fn default_cache_image_pull() -> bool {
    true
}

fn default_build_concurrency() -> usize {
    1
}

fn default_pull_concurrency() -> usize {
    4
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cache_image_pull: default_cache_image_pull(),
            cache_image_push: false,
            dry_run: false,
            build_concurrency: default_build_concurrency(),
            pull_concurrency: default_pull_concurrency(),
        }
    }
}

impl BuildOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables registry existence checks.
    #[must_use]
    pub fn with_cache_image_pull(mut self, enabled: bool) -> Self {
        self.cache_image_pull = enabled;
        self
    }

    /// Enables or disables pushing built images.
    #[must_use]
    pub fn with_cache_image_push(mut self, enabled: bool) -> Self {
        self.cache_image_push = enabled;
        self
    }

    /// Enables or disables dry run.
    #[must_use]
    pub fn with_dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Sets the build concurrency.
    #[must_use]
    pub fn with_build_concurrency(mut self, slots: usize) -> Self {
        self.build_concurrency = slots;
        self
    }

    /// Sets the pull concurrency.
    #[must_use]
    pub fn with_pull_concurrency(mut self, slots: usize) -> Self {
        self.pull_concurrency = slots;
        self
    }

    /// Returns the options with every concurrency knob at least 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.build_concurrency = self.build_concurrency.max(1);
        self.pull_concurrency = self.pull_concurrency.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BuildOptions::default();
        assert!(opts.cache_image_pull);
        assert!(!opts.cache_image_push);
        assert_eq!(opts.build_concurrency, 1);
    }

    #[test]
    fn test_normalized_raises_zero_slots() {
        let opts = BuildOptions::new()
            .with_build_concurrency(0)
            .with_pull_concurrency(0)
            .normalized();

        assert_eq!(opts.build_concurrency, 1);
        assert_eq!(opts.pull_concurrency, 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let opts: BuildOptions = serde_json::from_str(r#"{"dry_run": true}"#).unwrap();
        assert!(opts.dry_run);
        assert!(opts.cache_image_pull);
        assert_eq!(opts.pull_concurrency, 4);
    }
}
