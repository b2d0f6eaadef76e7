//! Output file naming shared by the stages.

use std::path::{Path, PathBuf};

/// Files starting with `_` are only ever pulled in by other sources.
pub fn is_partial(relative: &Path) -> bool {
    relative
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

/// `pages/home.css` -> `pages/home.min.css`.
pub fn with_min_suffix(relative: &Path, extension: &str) -> PathBuf {
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    relative.with_file_name(format!("{stem}.min.{extension}"))
}

/// Whether the file name ends with any of `suffixes`.
pub fn has_suffix(relative: &Path, suffixes: &[String]) -> bool {
    let Some(name) = relative.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    suffixes.iter().any(|s| name.ends_with(s.as_str()))
}
