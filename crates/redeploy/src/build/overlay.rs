//! Merging an overlay tree onto a source tree.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::{BuildError, Result};

/// A file copied from the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    /// Path relative to both trees.
    pub path: PathBuf,
    pub mode: u32,
}

/// Whether an overlay path is git metadata and must not be copied.
fn is_git_metadata(relative: &Path) -> bool {
    relative.to_string_lossy().starts_with(".git")
        || relative.file_name().is_some_and(|name| name == ".gitignore")
}

/// Copies every regular file of `overlay` onto `target`, keeping relative
/// paths and permissions. A failed copy removes the partial file and aborts.
pub fn copy_tree(overlay: &Path, target: &Path) -> Result<Vec<CopiedFile>> {
    let mut copied = Vec::new();

    for entry in WalkDir::new(overlay).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(overlay).to_path_buf();
            BuildError::Overlay {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(overlay) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if is_git_metadata(relative) {
            continue;
        }

        let destination = target.join(relative);
        let overlay_err = |source| BuildError::Overlay {
            path: relative.to_path_buf(),
            source,
        };

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(overlay_err)?;
        }
        if let Err(source) = std::fs::copy(entry.path(), &destination) {
            match std::fs::remove_file(&destination) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "failed to remove partial overlay file {}: {}",
                    destination.display(),
                    e
                ),
            }
            return Err(overlay_err(source));
        }

        let mode = entry.metadata().map(|m| file_mode(&m)).unwrap_or(0);
        copied.push(CopiedFile {
            path: relative.to_path_buf(),
            mode,
        });
    }

    Ok(copied)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
