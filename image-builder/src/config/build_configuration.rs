//! Typed build configuration of an application.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Spec attribute holding the ignore patterns of a stage.
pub const DOCKER_IGNORES_ATTRIBUTE: &str = "dockerIgnores";

/// A free-form key/value bag of spec attributes.
pub type SpecBag = BTreeMap<String, SpecValue>;

/// A scalar or list value found in a spec bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecValue {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    String(String),
    /// A list of values.
    List(Vec<SpecValue>),
}

impl SpecValue {
    /// Returns the value as a string slice if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Flattens the value into strings.
    ///
    /// Lists yield their string items, a single string yields itself and
    /// any other scalar yields nothing.
    #[must_use]
    pub fn strings(&self) -> Vec<String> {
        match self {
            Self::String(s) => vec![s.clone()],
            Self::List(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for SpecValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for SpecValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SpecValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for SpecValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SpecValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Where the builder lives and where its stage images may be cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderSettings {
    /// The builder name.
    #[serde(default)]
    pub name: String,
    /// The builder location (a directory).
    #[serde(default)]
    pub location: String,
    /// A shared image repository consulted before the target repository.
    #[serde(default)]
    pub cache: Option<String>,
}

/// Build configuration of an application.
///
/// Spec attributes are resolved in two levels: the stage-specific bag first,
/// then the global bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    /// Builder settings.
    #[serde(default)]
    pub builder: BuilderSettings,
    /// Attributes shared by all stages.
    #[serde(default)]
    pub global_spec: SpecBag,
    /// Attributes per stage name.
    #[serde(default)]
    pub stage_specs: BTreeMap<String, SpecBag>,
}

impl BuildConfiguration {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the builder name.
    #[must_use]
    pub fn with_builder_name(mut self, name: impl Into<String>) -> Self {
        self.builder.name = name.into();
        self
    }

    /// Sets the builder location.
    #[must_use]
    pub fn with_builder_location(mut self, location: impl Into<String>) -> Self {
        self.builder.location = location.into();
        self
    }

    /// Sets the builder cache repository.
    #[must_use]
    pub fn with_builder_cache(mut self, cache: impl Into<String>) -> Self {
        self.builder.cache = Some(cache.into());
        self
    }

    /// Adds a global spec attribute.
    #[must_use]
    pub fn with_global_attribute(mut self, key: impl Into<String>, value: impl Into<SpecValue>) -> Self {
        self.global_spec.insert(key.into(), value.into());
        self
    }

    /// Adds a stage-specific spec attribute.
    #[must_use]
    pub fn with_stage_attribute(
        mut self,
        stage: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<SpecValue>,
    ) -> Self {
        self.stage_specs
            .entry(stage.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Returns the builder name.
    #[must_use]
    pub fn builder_name(&self) -> &str {
        &self.builder.name
    }

    /// Returns the builder location without trailing slash.
    #[must_use]
    pub fn builder_location(&self) -> &str {
        self.builder.location.trim_end_matches('/')
    }

    /// Returns the builder cache repository, if one is configured.
    #[must_use]
    pub fn builder_cache(&self) -> Option<&str> {
        self.builder
            .cache
            .as_deref()
            .map(|c| c.trim_end_matches('/'))
            .filter(|c| !c.is_empty())
    }

    /// Returns whether a builder cache is configured.
    #[must_use]
    pub fn is_builder_cache_set(&self) -> bool {
        self.builder_cache().is_some()
    }

    /// Looks up an attribute for a stage, falling back to the global bag.
    #[must_use]
    pub fn spec_attribute(&self, stage: &str, key: &str) -> Option<&SpecValue> {
        self.stage_specs
            .get(stage)
            .and_then(|bag| bag.get(key))
            .or_else(|| self.global_spec.get(key))
    }

    /// Returns the string items of an attribute from both levels, global first.
    #[must_use]
    pub fn merged_string_attribute(&self, stage: &str, key: &str) -> Vec<String> {
        let mut result: Vec<String> = self
            .global_spec
            .get(key)
            .map(SpecValue::strings)
            .unwrap_or_default();

        if let Some(value) = self.stage_specs.get(stage).and_then(|bag| bag.get(key)) {
            result.extend(value.strings());
        }
        result
    }

    /// Returns the configured ignore patterns of a stage.
    #[must_use]
    pub fn ignore_patterns(&self, stage: &str) -> Vec<String> {
        self.merged_string_attribute(stage, DOCKER_IGNORES_ATTRIBUTE)
    }

    /// Returns the attribute names visible to a stage, sorted and deduplicated.
    #[must_use]
    pub fn spec_attribute_names(&self, stage: &str) -> Vec<String> {
        let mut names: Vec<String> = self.global_spec.keys().cloned().collect();
        if let Some(bag) = self.stage_specs.get(stage) {
            names.extend(bag.keys().cloned());
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> BuildConfiguration {
        BuildConfiguration::new()
            .with_builder_name("ruby")
            .with_builder_location("/builders/ruby/")
            .with_builder_cache("registry.local/cache/")
            .with_global_attribute("rubyVersion", "3.2")
            .with_global_attribute(
                DOCKER_IGNORES_ATTRIBUTE,
                SpecValue::List(vec!["tmp".into(), "log".into()]),
            )
            .with_stage_attribute("release", "rubyVersion", "3.3")
            .with_stage_attribute("release", DOCKER_IGNORES_ATTRIBUTE, SpecValue::List(vec!["spec".into()]))
    }

    #[test]
    fn test_stage_attribute_overrides_global() {
        let conf = sample();

        assert_eq!(conf.spec_attribute("release", "rubyVersion"), Some(&"3.3".into()));
        assert_eq!(conf.spec_attribute("base", "rubyVersion"), Some(&"3.2".into()));
        assert_eq!(conf.spec_attribute("base", "missing"), None);
    }

    #[test]
    fn test_merged_ignore_patterns_global_first() {
        let conf = sample();

        assert_eq!(conf.ignore_patterns("release"), vec!["tmp", "log", "spec"]);
        assert_eq!(conf.ignore_patterns("base"), vec!["tmp", "log"]);
    }

    #[test]
    fn test_builder_cache_normalized() {
        let conf = sample();
        assert_eq!(conf.builder_cache(), Some("registry.local/cache"));
        assert_eq!(conf.builder_location(), "/builders/ruby");

        let empty = BuildConfiguration::new().with_builder_cache("");
        assert!(!empty.is_builder_cache_set());
    }

    #[test]
    fn test_deserialize_from_json() {
        let conf: BuildConfiguration = serde_json::from_value(serde_json::json!({
            "builder": {"name": "node", "location": "./builders/node", "cache": "r.io/c"},
            "globalSpec": {"nodeVersion": 20, "production": true, "dockerIgnores": ["node_modules"]},
            "stageSpecs": {"test": {"production": false}}
        }))
        .unwrap();

        assert_eq!(conf.builder_name(), "node");
        assert_eq!(conf.spec_attribute("test", "production"), Some(&SpecValue::Bool(false)));
        assert_eq!(conf.spec_attribute("build", "nodeVersion").map(ToString::to_string), Some("20".to_string()));
        assert_eq!(conf.ignore_patterns("test"), vec!["node_modules"]);
    }

    #[test]
    fn test_spec_value_display() {
        let list = SpecValue::List(vec!["a".into(), SpecValue::Integer(2)]);
        assert_eq!(list.to_string(), "[a 2]");
        assert_eq!(SpecValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_attribute_names() {
        let conf = sample();
        assert_eq!(conf.spec_attribute_names("release"), vec!["dockerIgnores", "rubyVersion"]);
    }
}
