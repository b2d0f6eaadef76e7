//! Output removal stages.

use std::path::{Path, PathBuf};

use kiln_graph::output::remove_tree;
use kiln_graph::{BuildContext, GlobSet, Stage, StageError, StageOutput};

/// Removes a directory inside (or equal to) the output directory.
pub struct CleanStage {
    name: String,
    description: String,
    target: PathBuf,
    sources: GlobSet,
}

impl CleanStage {
    /// Name of the stage that removes the whole output directory.
    pub const NAME: &'static str = "clean";

    /// Name of the stage that removes only the vendor directory.
    pub const VENDOR: &'static str = "clean:vendor";

    /// Remove the whole output directory.
    pub fn all() -> Self {
        Self::new(Self::NAME, "Remove the output directory", "")
    }

    /// Remove `vendor_dir` inside the output directory.
    pub fn vendor(vendor_dir: impl Into<PathBuf>) -> Self {
        Self::new(Self::VENDOR, "Remove vendor files from the output", vendor_dir)
    }

    fn new(name: &str, description: &str, target: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            target: target.into(),
            sources: GlobSet::empty(),
        }
    }
}

impl Stage for CleanStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sources(&self) -> &GlobSet {
        &self.sources
    }

    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError> {
        let dest = ctx.dest_dir();
        let target = dest.join(&self.target);

        check_removable(&ctx.root, &dest)?;

        match remove_tree(&target)? {
            Some(removed) => {
                tracing::debug!("Removed {}", removed.display());
                Ok(StageOutput::new(vec![removed]))
            }
            None => Ok(StageOutput::default()),
        }
    }
}

/// The output directory must sit strictly inside the project root.
fn check_removable(root: &Path, dest: &Path) -> Result<(), StageError> {
    let unsafe_clean = |reason: &str| StageError::UnsafeClean {
        path: dest.to_path_buf(),
        reason: reason.to_string(),
    };

    let Ok(relative) = dest.strip_prefix(root) else {
        return Err(unsafe_clean("output directory is outside the project root"));
    };
    if relative.as_os_str().is_empty() {
        return Err(unsafe_clean("output directory is the project root"));
    }
    if relative
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(unsafe_clean("output directory escapes the project root"));
    }
    Ok(())
}
