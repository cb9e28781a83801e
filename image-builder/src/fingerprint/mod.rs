//! Content fingerprinting of stages.
//!
//! A fingerprint identifies "this stage would produce the same image". It is
//! a CRC32 checksum over the build context files that survive the stage's
//! ignore patterns, the list of their paths, and the rendered template with
//! volatile lines elided. It is a cache key, not a security boundary:
//! collisions are possible and accepted.

mod listing;
mod patterns;

pub use listing::{ContextLister, IgnoreFileLister, ListingCache};
pub use patterns::{Pattern, PatternMatcher};

use crate::errors::Result;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker comment making the following line invisible to the fingerprint.
pub const CONTENT_HASH_IGNORE_MARKER: &str = "# ContentHashIgnore";

/// Replacement for elided lines.
pub const ELIDED_LINE_PLACEHOLDER: &str = "# <elided by ContentHashIgnore>";

/// Replaces every line following a [`CONTENT_HASH_IGNORE_MARKER`] line with
/// [`ELIDED_LINE_PLACEHOLDER`].
///
/// Marker lines are never elided, so consecutive markers all point at the
/// first ordinary line after them.
#[must_use]
pub fn filter_volatile_lines(content: &str) -> String {
    let mut lines = Vec::new();
    let mut elide_next = false;

    for line in content.split('\n') {
        if line.contains(CONTENT_HASH_IGNORE_MARKER) {
            elide_next = true;
            lines.push(line);
        } else if elide_next {
            lines.push(ELIDED_LINE_PLACEHOLDER);
            elide_next = false;
        } else {
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Computes stage fingerprints.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    lister: Arc<dyn ContextLister>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(Arc::new(IgnoreFileLister::new()))
    }
}

impl Fingerprinter {
    /// Creates a fingerprinter using the given context lister.
    #[must_use]
    pub fn new(lister: Arc<dyn ContextLister>) -> Self {
        Self { lister }
    }

    /// Returns the context lister.
    #[must_use]
    pub fn lister(&self) -> &Arc<dyn ContextLister> {
        &self.lister
    }

    /// Returns the 8 hex character fingerprint of `content` built in
    /// `context_root` with `ignore_patterns`.
    ///
    /// # Errors
    ///
    /// Returns IO and pattern errors. A file vanishing between listing and
    /// reading is skipped with a warning.
    pub fn fingerprint(
        &self,
        content: &str,
        context_root: &Path,
        ignore_patterns: &[String],
    ) -> Result<String> {
        let filtered = filter_volatile_lines(content);
        let files = self.lister.list_files(context_root, ignore_patterns)?;
        debug!(
            context = %context_root.display(),
            files = files.len(),
            "Fingerprinting build context"
        );

        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0_u8; 64 * 1024];
        for file in &files {
            match hash_file(&mut hasher, &context_root.join(file), &mut buffer) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(file = %file, "File vanished before it could be hashed, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }

        hasher.update(files.join("\n").as_bytes());
        hasher.update(filtered.as_bytes());

        Ok(format!("{:08x}", hasher.finalize()))
    }
}

fn hash_file(hasher: &mut crc32fast::Hasher, path: &Path, buffer: &mut [u8]) -> io::Result<()> {
    let mut file = File::open(path)?;
    loop {
        let read = file.read(buffer)?;
        if read == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn fresh() -> Fingerprinter {
        Fingerprinter::default()
    }

    #[test]
    fn test_empty_template_and_context_is_stable() {
        let dir = tempfile::tempdir().unwrap();

        let first = fresh().fingerprint("", dir.path(), &[]).unwrap();
        let second = fresh().fingerprint("", dir.path(), &[]).unwrap();

        assert_eq!(first, "00000000");
        assert_eq!(first, second);
    }

    #[test]
    fn test_known_value() {
        let dir = tempfile::tempdir().unwrap();
        // CRC32/IEEE check value
        assert_eq!(fresh().fingerprint("123456789", dir.path(), &[]).unwrap(), "cbf43926");
    }

    #[test]
    fn test_included_file_changes_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let before = fresh().fingerprint("FROM scratch", dir.path(), &[]).unwrap();

        fs::write(dir.path().join("main.rs"), "fn main() { println!() }").unwrap();
        let after = fresh().fingerprint("FROM scratch", dir.path(), &[]).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_excluded_file_does_not_change_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("debug.log"), "one").unwrap();
        let patterns = vec!["*.log".to_string()];
        let before = fresh().fingerprint("FROM scratch", dir.path(), &patterns).unwrap();

        fs::write(dir.path().join("debug.log"), "two").unwrap();
        let after = fresh().fingerprint("FROM scratch", dir.path(), &patterns).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_renamed_file_changes_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "same").unwrap();
        let before = fresh().fingerprint("", dir.path(), &[]).unwrap();

        fs::rename(dir.path().join("a"), dir.path().join("b")).unwrap();
        let after = fresh().fingerprint("", dir.path(), &[]).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_volatile_line_is_elided() {
        let dir = tempfile::tempdir().unwrap();
        let a = "FROM alpine\n# ContentHashIgnore\nARG BUILD_DATE=2024-01-01\nRUN true";
        let b = "FROM alpine\n# ContentHashIgnore\nARG BUILD_DATE=2025-06-30\nRUN true";
        let c = "FROM alpine\n# ContentHashIgnore\nARG BUILD_DATE=2024-01-01\nRUN false";
        let d = "FROM debian\n# ContentHashIgnore\nARG BUILD_DATE=2024-01-01\nRUN true";

        let fp = fresh();
        let hash_a = fp.fingerprint(a, dir.path(), &[]).unwrap();
        assert_eq!(hash_a, fp.fingerprint(b, dir.path(), &[]).unwrap());
        assert_ne!(hash_a, fp.fingerprint(c, dir.path(), &[]).unwrap());
        assert_ne!(hash_a, fp.fingerprint(d, dir.path(), &[]).unwrap());
    }

    #[test]
    fn test_filter_volatile_lines() {
        let filtered = filter_volatile_lines("a\n# ContentHashIgnore\nb\nc");
        assert_eq!(
            filtered,
            format!("a\n# ContentHashIgnore\n{ELIDED_LINE_PLACEHOLDER}\nc")
        );

        assert_eq!(filter_volatile_lines("x\n# ContentHashIgnore"), "x\n# ContentHashIgnore");
    }

    #[test]
    fn test_consecutive_markers_elide_following_line() {
        let filtered = filter_volatile_lines("a\n# ContentHashIgnore\n# ContentHashIgnore\nX=1\nb");
        assert_eq!(
            filtered,
            format!("a\n# ContentHashIgnore\n# ContentHashIgnore\n{ELIDED_LINE_PLACEHOLDER}\nb")
        );

        let dir = tempfile::tempdir().unwrap();
        let fingerprinter = Fingerprinter::default();
        let first = fingerprinter
            .fingerprint("A\n# ContentHashIgnore\n# ContentHashIgnore\nX=1\nB", dir.path(), &[])
            .unwrap();
        let second = fingerprinter
            .fingerprint("A\n# ContentHashIgnore\n# ContentHashIgnore\nX=2\nB", dir.path(), &[])
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_context_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        assert!(fresh().fingerprint("", &missing, &[]).is_err());
    }
}
