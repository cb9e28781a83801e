//! Build context enumeration.

use super::patterns::PatternMatcher;
use crate::errors::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Lists the files of a build context that survive a set of ignore patterns.
pub trait ContextLister: Send + Sync + Debug {
    /// Returns the relative, `/`-separated, lexicographically sorted paths of
    /// the regular files under `root` not excluded by `patterns`.
    fn list_files(&self, root: &Path, patterns: &[String]) -> Result<Vec<String>>;
}

type ListingKey = (PathBuf, Vec<String>);

/// Memoized listings keyed by context root and patterns.
#[derive(Debug, Default)]
pub struct ListingCache {
    entries: Mutex<HashMap<ListingKey, Vec<String>>>,
}

impl ListingCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached listing.
    #[must_use]
    pub fn get(&self, root: &Path, patterns: &[String]) -> Option<Vec<String>> {
        self.entries
            .lock()
            .get(&(root.to_path_buf(), patterns.to_vec()))
            .cloned()
    }

    /// Stores a listing.
    pub fn insert(&self, root: &Path, patterns: &[String], files: Vec<String>) {
        self.entries
            .lock()
            .insert((root.to_path_buf(), patterns.to_vec()), files);
    }

    /// Forgets every listing.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    /// Returns the number of cached listings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Walks the filesystem applying `.dockerignore` semantics.
#[derive(Debug, Default)]
pub struct IgnoreFileLister {
    cache: ListingCache,
}

impl IgnoreFileLister {
    /// Creates a lister with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the listing cache.
    #[must_use]
    pub fn cache(&self) -> &ListingCache {
        &self.cache
    }

    fn walk(root: &Path, matcher: &PatternMatcher) -> Result<Vec<String>> {
        std::fs::metadata(root)?;

        let mut files = Vec::new();
        let mut entries = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                    warn!(error = %err, "Path vanished while listing the build context");
                    continue;
                }
                Err(err) => return Err(io::Error::from(err).into()),
            };

            let relative = relative_path(root, entry.path());
            let is_dir = entry.file_type().is_dir();

            if matcher.matches(&relative) {
                trace!(path = %relative, "Skipping excluded path");
                if is_dir && !matcher.may_reinclude_under(&relative) {
                    trace!(path = %relative, "Skipping whole directory");
                    entries.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_file() {
                trace!(path = %relative, "Including path in context");
                files.push(relative);
            }
        }

        files.sort();
        Ok(files)
    }
}

impl ContextLister for IgnoreFileLister {
    fn list_files(&self, root: &Path, patterns: &[String]) -> Result<Vec<String>> {
        if let Some(files) = self.cache.get(root, patterns) {
            trace!(count = files.len(), root = %root.display(), "Found listing in cache");
            return Ok(files);
        }

        let matcher = PatternMatcher::new(patterns)?;
        let files = Self::walk(root, &matcher)?;
        self.cache.insert(root, patterns, files.clone());
        Ok(files)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
