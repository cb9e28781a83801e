//! Comment directives embedded in stage templates.

use regex::Regex;
use std::sync::LazyLock;

/// Directive selecting a human readable prefix for the image tag.
pub const FRIENDLY_TAG: &str = "FriendlyTag";
/// Directive adding an extra reference to apply after push.
pub const TAG_ALIAS: &str = "TagAlias";
/// Directive adding an ignore pattern for the build context.
pub const DOCKER_IGNORE: &str = "DockerIgnore";
/// Directive switching the build context to the stage directory.
pub const USE_BUILDER_CONTEXT: &str = "UseBuilderContext";

static DIRECTIVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*#[ \t]*([A-Za-z]+)(?:[ \t]+(.*?))?[ \t]*\r?$")
        .unwrap_or_else(|err| unreachable!("directive regex is valid: {err}"))
});

/// Metadata collected from the directive comments of a rendered template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// Tag prefix. Only the first `FriendlyTag` counts.
    pub friendly_tag: Option<String>,
    /// References applied after the image was pushed.
    pub tag_aliases: Vec<String>,
    /// Extra ignore patterns.
    pub docker_ignores: Vec<String>,
    /// Whether the stage directory is the build context.
    pub use_builder_context: bool,
}

impl Directives {
    /// Parses the directives of `content`.
    ///
    /// Unknown names and directives missing their value are ordinary
    /// comments.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut directives = Self::default();

        for captures in DIRECTIVE_LINE.captures_iter(content) {
            let name = captures.get(1).map_or("", |m| m.as_str());
            let value = captures
                .get(2)
                .map(|m| m.as_str().trim())
                .filter(|v| !v.is_empty());

            match (name, value) {
                (FRIENDLY_TAG, Some(value)) => {
                    if directives.friendly_tag.is_none() {
                        directives.friendly_tag = Some(value.to_string());
                    }
                }
                (TAG_ALIAS, Some(value)) => directives.tag_aliases.push(value.to_string()),
                (DOCKER_IGNORE, Some(value)) => directives.docker_ignores.push(value.to_string()),
                (USE_BUILDER_CONTEXT, _) => directives.use_builder_context = true,
                _ => {}
            }
        }

        directives
    }
}
