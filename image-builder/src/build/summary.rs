//! The summary file listing the image of every stage.

use std::path::Path;

/// Default name of the summary file.
pub const SUMMARY_FILE_NAME: &str = ".image-builder-info";

/// Formats `(stage, image)` pairs as sorted `stage|image` lines.
#[must_use]
pub fn format_summary<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut lines: Vec<String> = entries
        .into_iter()
        .map(|(stage, image)| format!("{stage}|{image}"))
        .collect();
    lines.sort();

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Writes the summary to `path`, replacing any previous file.
///
/// # Errors
///
/// Returns IO errors from writing the file.
pub async fn write_summary<'a, I>(path: &Path, entries: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    tokio::fs::write(path, format_summary(entries)).await
}
