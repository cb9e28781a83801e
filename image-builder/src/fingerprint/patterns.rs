//! Ignore-file pattern matching.
//!
//! Patterns follow `.dockerignore` conventions: they are evaluated in order
//! and the last matching pattern decides, a leading `!` re-includes paths
//! excluded by earlier patterns, and a pattern also matches every path below
//! a directory it matches.

use crate::errors::PatternError;
use globset::{GlobBuilder, GlobMatcher};

/// A single compiled ignore pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    exclusion: bool,
    depth: usize,
    matcher: GlobMatcher,
}

impl Pattern {
    /// Returns the cleaned pattern text, without the `!` prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns true for `!` patterns, which re-include paths.
    #[must_use]
    pub fn is_exclusion(&self) -> bool {
        self.exclusion
    }

    fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// An ordered set of ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    patterns: Vec<Pattern>,
    exclusions: bool,
}

impl PatternMatcher {
    /// Compiles a list of raw patterns.
    ///
    /// Blank lines and `#` comments are dropped, leading `/` and `./` are
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] for a bare `!` or a pattern that is not a
    /// valid glob.
    pub fn new<S: AsRef<str>>(raw_patterns: &[S]) -> Result<Self, PatternError> {
        let mut patterns = Vec::with_capacity(raw_patterns.len());
        let mut exclusions = false;

        for raw in raw_patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }

            let (exclusion, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, raw),
            };
            let text = clean(body);
            if text.is_empty() {
                return Err(PatternError::new(raw, "pattern is empty after cleaning"));
            }

            let matcher = GlobBuilder::new(&text)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(|e| PatternError::new(raw, e.to_string()))?
                .compile_matcher();

            exclusions |= exclusion;
            patterns.push(Pattern {
                depth: text.split('/').count(),
                text,
                exclusion,
                matcher,
            });
        }

        Ok(Self {
            patterns,
            exclusions,
        })
    }

    /// Returns the compiled patterns in evaluation order.
    #[must_use]
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Returns true if at least one `!` pattern exists.
    #[must_use]
    pub fn has_exclusions(&self) -> bool {
        self.exclusions
    }

    /// Returns true if `path` (relative, `/`-separated) is ignored.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let components: Vec<&str> = path.split('/').collect();
        let mut matched = false;

        for pattern in &self.patterns {
            let mut hit = pattern.matches(path);
            if !hit && pattern.depth < components.len() {
                hit = pattern.matches(&components[..pattern.depth].join("/"));
            }
            if hit {
                matched = !pattern.exclusion;
            }
        }

        matched
    }

    /// Returns true if a `!` pattern could re-include something below `dir`.
    ///
    /// An ignored directory for which this returns false can be pruned
    /// without walking it.
    #[must_use]
    pub fn may_reinclude_under(&self, dir: &str) -> bool {
        if !self.exclusions {
            return false;
        }
        let prefix = format!("{dir}/");
        self.patterns
            .iter()
            .filter(|p| p.exclusion)
            .any(|p| p.text.starts_with(&prefix) || p.text.starts_with("**"))
    }
}

fn clean(pattern: &str) -> String {
    let mut text = pattern;
    loop {
        if let Some(rest) = text.strip_prefix("./") {
            text = rest;
        } else if let Some(rest) = text.strip_prefix('/') {
            text = rest;
        } else {
            break;
        }
    }
    text.trim_end_matches('/').to_string()
}
