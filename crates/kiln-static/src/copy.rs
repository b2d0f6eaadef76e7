//! Byte-copy stages for static assets and third-party vendor files.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use kiln_graph::output::copy_atomic;
use kiln_graph::{BuildContext, GlobSet, Matched, Stage, StageError, StageOutput};

/// Copies matched files, keeping their path relative to the glob base.
pub struct AssetStage {
    sources: GlobSet,
    prefix: PathBuf,
}

impl AssetStage {
    /// Stage name.
    pub const NAME: &'static str = "copy:assets";

    /// Create the stage.
    pub fn new(globs: &[String], prefix: impl Into<PathBuf>) -> Result<Self, StageError> {
        Ok(Self {
            sources: GlobSet::new(globs)?,
            prefix: prefix.into(),
        })
    }
}

impl Stage for AssetStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Copy fonts, images and media"
    }

    fn sources(&self) -> &GlobSet {
        &self.sources
    }

    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError> {
        let target = ctx.dest_dir().join(&self.prefix);
        let outputs = copy_all(&self.sources.walk(&ctx.root), &target)?;
        Ok(StageOutput::new(outputs))
    }

    fn output_for(&self, ctx: &BuildContext, source: &Path) -> Option<PathBuf> {
        let relative = self.sources.relative(source)?;
        Some(ctx.dest_dir().join(&self.prefix).join(relative))
    }
}

/// One vendor copy: files matched by `from` land in `vendor/<to>`.
#[derive(Debug, Clone)]
pub struct VendorEntry {
    /// Root-relative globs (usually under `node_modules`)
    pub from: Vec<String>,

    /// Directory under the vendor directory
    pub to: PathBuf,
}

struct CompiledEntry {
    globs: GlobSet,
    to: PathBuf,
}

/// Copies third-party runtime files into the vendor directory.
///
/// The stage completes only after every entry has been copied.
pub struct VendorStage {
    entries: Vec<CompiledEntry>,
    vendor_dir: PathBuf,
    sources: GlobSet,
}

impl VendorStage {
    /// Stage name.
    pub const NAME: &'static str = "copy:vendor";

    /// Create the stage.
    pub fn new(entries: &[VendorEntry], vendor_dir: impl Into<PathBuf>) -> Result<Self, StageError> {
        let compiled = entries
            .iter()
            .map(|entry| {
                Ok(CompiledEntry {
                    globs: GlobSet::new(&entry.from)?,
                    to: entry.to.clone(),
                })
            })
            .collect::<Result<Vec<_>, StageError>>()?;

        let sources = GlobSet::new(entries.iter().flat_map(|e| e.from.iter()))?;

        Ok(Self {
            entries: compiled,
            vendor_dir: vendor_dir.into(),
            sources,
        })
    }
}

impl Stage for VendorStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Copy third-party runtime assets"
    }

    fn sources(&self) -> &GlobSet {
        &self.sources
    }

    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError> {
        let vendor = ctx.dest_dir().join(&self.vendor_dir);

        let per_entry = self
            .entries
            .par_iter()
            .map(|entry| {
                let files = entry.globs.walk(&ctx.root);
                if files.is_empty() {
                    let patterns: Vec<&str> =
                        entry.globs.includes().iter().map(|g| g.pattern()).collect();
                    tracing::warn!("No vendor files matched {}", patterns.join(", "));
                }
                copy_all(&files, &vendor.join(&entry.to))
            })
            .collect::<Result<Vec<_>, StageError>>()?;

        Ok(StageOutput::new(per_entry.into_iter().flatten().collect()))
    }

    fn output_for(&self, ctx: &BuildContext, source: &Path) -> Option<PathBuf> {
        self.entries.iter().find_map(|entry| {
            let relative = entry.globs.relative(source)?;
            Some(
                ctx.dest_dir()
                    .join(&self.vendor_dir)
                    .join(&entry.to)
                    .join(relative),
            )
        })
    }
}

fn copy_all(files: &[Matched], target: &Path) -> Result<Vec<PathBuf>, StageError> {
    files
        .par_iter()
        .map(|file| {
            let output = target.join(&file.relative);
            copy_atomic(&file.path, &output)?;
            Ok(output)
        })
        .collect()
}
