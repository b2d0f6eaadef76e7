//! Trait definitions for build stages.

use std::path::{Path, PathBuf};

use crate::glob::{GlobError, GlobSet};

/// Paths shared by every stage of a build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Project root; source globs are relative to it
    pub root: PathBuf,

    /// Output directory (relative paths are resolved against `root`)
    pub dest: PathBuf,
}

impl BuildContext {
    /// Create a context for the given root and output directory.
    pub fn new(root: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dest: dest.into(),
        }
    }

    /// The output directory as a path usable from the current process.
    pub fn dest_dir(&self) -> PathBuf {
        self.root.join(&self.dest)
    }

    /// Resolve a root-relative path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

/// Files produced by one run of a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    /// Written (or removed) output paths
    pub outputs: Vec<PathBuf>,
}

impl StageOutput {
    /// Output listing the given files.
    pub fn new(outputs: Vec<PathBuf>) -> Self {
        Self { outputs }
    }
}

/// Errors that can occur while running a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: {message}", .path.display())]
    Transform { path: PathBuf, message: String },

    #[error("Invalid glob: {0}")]
    Glob(#[from] GlobError),

    #[error("Refusing to remove {}: {reason}", .path.display())]
    UnsafeClean { path: PathBuf, reason: String },

    #[error("Stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A transformation failure for one source file.
    pub fn transform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Transform {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A unit of work in the task graph.
///
/// A stage maps its matched sources to output files. Runs are cache-free:
/// every matched source is processed on every run, so running twice on
/// unchanged sources yields the same output tree.
pub trait Stage: Send + Sync {
    /// Task name (e.g., "compile:styles")
    fn name(&self) -> &str;

    /// One-line description for task listings
    fn description(&self) -> &str {
        ""
    }

    /// Source globs, relative to the project root
    fn sources(&self) -> &GlobSet;

    /// Process every matched source and write the outputs.
    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError>;

    /// The output a single root-relative source maps to.
    ///
    /// Returns `None` when the source emits nothing on its own.
    fn output_for(&self, ctx: &BuildContext, source: &Path) -> Option<PathBuf> {
        let _ = (ctx, source);
        None
    }
}
