//! Writing and removing output files.
//!
//! Outputs are written to a temporary file in the target directory and then
//! renamed into place, so concurrent runs of the same stage never leave a
//! partially written file behind.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::stage::StageError;

/// Write `contents` to `path`, creating parent directories as needed.
///
/// New files are world-readable (`0644` before the umask) so the output tree
/// can be served by another user.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StageError> {
    write_with(path, contents, output_permissions())
}

/// Copy a file through a temp file, keeping the source's permissions.
pub fn copy_atomic(from: &Path, to: &Path) -> Result<(), StageError> {
    let bytes = fs::read(from).map_err(|e| StageError::io(from, e))?;
    let permissions = fs::metadata(from)
        .map_err(|e| StageError::io(from, e))?
        .permissions();
    write_with(to, &bytes, Some(permissions))
}

fn write_with(
    path: &Path,
    contents: &[u8],
    permissions: Option<fs::Permissions>,
) -> Result<(), StageError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;

    let mut builder = tempfile::Builder::new();
    if let Some(permissions) = permissions {
        builder.permissions(permissions);
    }
    let mut file = builder
        .tempfile_in(parent)
        .map_err(|e| StageError::io(parent, e))?;
    file.write_all(contents)
        .map_err(|e| StageError::io(file.path(), e))?;
    file.persist(path)
        .map_err(|e| StageError::io(path, e.error))?;

    Ok(())
}

#[cfg(unix)]
fn output_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn output_permissions() -> Option<fs::Permissions> {
    None
}

/// Remove a single output file. A missing file is not an error.
///
/// Returns whether a file was removed.
pub fn remove_output(path: &Path) -> Result<bool, StageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StageError::io(path, e)),
    }
}

/// Remove a directory tree. A missing directory is not an error.
pub fn remove_tree(path: &Path) -> Result<Option<PathBuf>, StageError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(Some(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StageError::io(path, e)),
    }
}
