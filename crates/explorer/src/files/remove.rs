//! Deletion: move to trash or remove permanently.
//!
//! Each removal is all-or-nothing for its path. Moves are a single rename
//! when the trash is on the same filesystem; across filesystems the copy is
//! staged under a hidden name and renamed into place before the source goes.
//! Permanent deletion of a directory first renames it to a hidden sibling so
//! the original path disappears in one step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::guard::{normalize, GuardedPath, Root};
use crate::config::{same_location, RemoveConfig};
use crate::error::{ExplorerError, Result};

/// Timestamp appended to trashed entries.
const TRASH_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How deletions are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveMethod {
    /// Move into the trash directory.
    #[default]
    Mv,
    /// Delete permanently.
    Rm,
}

/// What a removal did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Removal {
    /// Moved into the trash.
    Trashed {
        /// Original location.
        from: PathBuf,
        /// Location inside the trash.
        to: PathBuf,
    },
    /// Deleted permanently.
    Deleted {
        /// Removed path.
        path: PathBuf,
    },
}

/// Carries out deletions according to configuration.
#[derive(Debug, Clone)]
pub struct Remover {
    method: RemoveMethod,
    trash: PathBuf,
    disabled: bool,
}

impl Remover {
    /// Create a remover using `trash` for the `mv` method.
    pub fn new(method: RemoveMethod, trash: impl Into<PathBuf>) -> Self {
        Self {
            method,
            trash: trash.into(),
            disabled: false,
        }
    }

    /// Build from the `[remove]` section.
    pub fn from_config(config: &RemoveConfig) -> Self {
        Self::new(config.method, config.path.clone()).disabled(config.disabled)
    }

    /// Refuse every deletion.
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Configured method.
    pub fn method(&self) -> RemoveMethod {
        self.method
    }

    /// Trash directory.
    pub fn trash(&self) -> &Path {
        &self.trash
    }

    /// Remove `target`.
    ///
    /// Fails with `Forbidden` when removal is disabled or when `target` is
    /// the root, the user's `home`, or (for `mv`) the trash itself or one of
    /// its ancestors. Whatever the method, a failed removal leaves `target`
    /// where it was.
    pub async fn remove(&self, root: &Root, home: &Path, target: &GuardedPath) -> Result<Removal> {
        if self.disabled {
            return Err(ExplorerError::Forbidden("removal is disabled".to_string()));
        }

        self.check_target(root, home, target.as_path())?;
        let real = real_target(root, target)?;
        self.check_target(root, home, &real)?;

        let remover = self.clone();
        let target = real;
        let removal = tokio::task::spawn_blocking(move || match remover.method {
            RemoveMethod::Mv => remover.move_to_trash(&target),
            RemoveMethod::Rm => delete(&target),
        })
        .await??;

        match &removal {
            Removal::Trashed { from, to } => {
                tracing::info!(from = %from.display(), to = %to.display(), "Moved to trash")
            }
            Removal::Deleted { path } => tracing::info!(path = %path.display(), "Deleted"),
        }

        Ok(removal)
    }

    fn check_target(&self, root: &Root, home: &Path, target: &Path) -> Result<()> {
        if target == root.as_path() || same_location(target, root.as_path()) {
            return Err(ExplorerError::Forbidden(
                "cannot remove the root directory".to_string(),
            ));
        }

        if same_location(target, home) {
            return Err(ExplorerError::Forbidden(
                "cannot remove the home directory".to_string(),
            ));
        }

        if self.method == RemoveMethod::Mv && normalize(&self.trash).starts_with(target) {
            return Err(ExplorerError::Forbidden(
                "cannot move the trash into itself".to_string(),
            ));
        }

        Ok(())
    }

    /// Permanently remove everything in the trash. Returns the number of
    /// top-level entries removed.
    ///
    /// Refuses with `Forbidden` when the trash is the root.
    pub async fn empty_trash(&self, root: &Root) -> Result<usize> {
        if self.disabled {
            return Err(ExplorerError::Forbidden("removal is disabled".to_string()));
        }

        if same_location(&self.trash, root.as_path()) {
            return Err(ExplorerError::Forbidden(
                "trash directory is the root directory".to_string(),
            ));
        }

        let trash = self.trash.clone();
        let removed = tokio::task::spawn_blocking(move || clear_dir(&trash)).await??;

        tracing::info!(trash = %self.trash.display(), removed, "Emptied trash");
        Ok(removed)
    }

    fn move_to_trash(&self, target: &Path) -> Result<Removal> {
        fs::symlink_metadata(target).map_err(|e| ExplorerError::fs(target, e))?;
        fs::create_dir_all(&self.trash).map_err(|e| ExplorerError::fs(&self.trash, e))?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ExplorerError::Forbidden("path has no file name".to_string()))?;
        let destination = trash_destination(&self.trash, &name);

        match fs::rename(target, &destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                move_across_devices(target, &destination)?;
            }
            Err(e) => return Err(ExplorerError::fs(target, e)),
        }

        Ok(Removal::Trashed {
            from: target.to_path_buf(),
            to: destination,
        })
    }
}

/// Resolve the parent of `target` through any symlinks and rebuild the path
/// on the real parent. The final segment is kept as is, so a symlink is
/// removed itself rather than what it points to.
fn real_target(root: &Root, target: &GuardedPath) -> Result<PathBuf> {
    let name = target
        .as_path()
        .file_name()
        .ok_or_else(|| ExplorerError::Forbidden("path has no file name".to_string()))?;

    let parent = root.parent_of(target).resolve(root)?;
    Ok(parent.as_path().join(name))
}

/// `<trash>/<name>.<timestamp>`, with a numeric suffix if that is taken.
fn trash_destination(trash: &Path, name: &str) -> PathBuf {
    let stamped = format!("{}.{}", name, Local::now().format(TRASH_STAMP_FORMAT));
    let mut destination = trash.join(&stamped);
    let mut n = 1;
    while fs::symlink_metadata(&destination).is_ok() {
        destination = trash.join(format!("{}-{}", stamped, n));
        n += 1;
    }
    destination
}

/// Hidden sibling name used while an entry is in flight.
fn staging_path(next_to: &Path, name: &str, purpose: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let parent = next_to.parent().unwrap_or(next_to);
    parent.join(format!(
        ".{}.{}-{}-{}",
        name,
        purpose,
        std::process::id(),
        nanos
    ))
}

fn move_across_devices(source: &Path, destination: &Path) -> Result<()> {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging = staging_path(destination, &name, "partial");

    if let Err(e) = copy_recursive(source, &staging) {
        let _ = remove_any(&staging);
        return Err(e);
    }

    fs::rename(&staging, destination).map_err(|e| {
        let _ = remove_any(&staging);
        ExplorerError::fs(destination, e)
    })?;

    // The copy is in place; the source must go too or the move is undone.
    if let Err(e) = remove_any(source) {
        let _ = remove_any(destination);
        return Err(ExplorerError::fs(source, e));
    }

    Ok(())
}

fn copy_recursive(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            ExplorerError::fs(&path, io::Error::other(e.to_string()))
        })?;

        let relative = entry.path().strip_prefix(source).unwrap_or(Path::new(""));
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ExplorerError::fs(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| ExplorerError::fs(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &target).map_err(|e| ExplorerError::fs(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| ExplorerError::fs(entry.path(), e))?;
        }
    }
    Ok(())
}

fn delete(target: &Path) -> Result<Removal> {
    let metadata = fs::symlink_metadata(target).map_err(|e| ExplorerError::fs(target, e))?;

    if metadata.is_dir() {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let staging = staging_path(target, &name, "deleting");
        fs::rename(target, &staging).map_err(|e| ExplorerError::fs(target, e))?;

        if let Err(e) = fs::remove_dir_all(&staging) {
            tracing::warn!(
                path = %target.display(),
                staging = %staging.display(),
                "Directory unlinked but its contents were not fully removed: {}",
                e
            );
        }
    } else {
        fs::remove_file(target).map_err(|e| ExplorerError::fs(target, e))?;
    }

    Ok(Removal::Deleted {
        path: target.to_path_buf(),
    })
}

fn remove_any(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn clear_dir(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(ExplorerError::fs(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| ExplorerError::fs(dir, e))?;
        let path = entry.path();
        remove_any(&path).map_err(|e| ExplorerError::fs(&path, e))?;
        removed += 1;
    }
    Ok(removed)
}
