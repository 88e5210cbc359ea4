//! Path confinement.
//!
//! Every user-supplied path is resolved against a [`Root`] before anything
//! touches the filesystem. Resolution is lexical and total: a path that would
//! leave the root collapses to the root itself, and callers treat "at root"
//! as unauthorized for operations that need a concrete target.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Serialize, Serializer};

use crate::error::{ExplorerError, Result};

/// An absolute, canonical directory that bounds everything a user can reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    path: PathBuf,
}

impl Root {
    /// Canonicalize `path` and use it as a confinement root.
    ///
    /// Fails when the path does not exist or is not a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|e| ExplorerError::fs(path, e))?;
        let metadata = fs::metadata(&canonical).map_err(|e| ExplorerError::fs(&canonical, e))?;
        if !metadata.is_dir() {
            return Err(ExplorerError::NotADirectory(canonical));
        }
        Ok(Self { path: canonical })
    }

    /// Use an already canonical absolute path as root, without touching the
    /// filesystem. The path is still lexically normalized.
    pub fn from_canonical(path: impl Into<PathBuf>) -> Self {
        Self {
            path: normalize(&path.into()),
        }
    }

    /// The root directory.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The root itself, in its distinguished "at root" state.
    pub fn guarded(&self) -> GuardedPath {
        GuardedPath {
            path: self.path.clone(),
            at_root: true,
        }
    }

    /// Resolve `user_path` against the root.
    ///
    /// Relative paths are joined to the root, absolute paths are taken as
    /// they are, and the result is normalized lexically. Anything that is
    /// not the root or a descendant of it (by path segments, so `/home/foo`
    /// does not contain `/home/foobar`) collapses to the root.
    pub fn confine(&self, user_path: impl AsRef<Path>) -> GuardedPath {
        let user_path = user_path.as_ref();
        if user_path.as_os_str().is_empty() {
            return self.guarded();
        }

        let resolved = normalize(&self.path.join(user_path));

        if resolved == self.path {
            return self.guarded();
        }

        if !resolved.starts_with(&self.path) {
            tracing::debug!(
                root = %self.path.display(),
                requested = %user_path.display(),
                "Path escapes root, clamping to root"
            );
            return self.guarded();
        }

        GuardedPath {
            path: resolved,
            at_root: false,
        }
    }

    /// The parent of `path`, clamped to the root.
    pub fn parent_of(&self, path: &GuardedPath) -> GuardedPath {
        if path.is_root() {
            return self.guarded();
        }
        match path.as_path().parent() {
            Some(parent) => self.confine(parent),
            None => self.guarded(),
        }
    }

    /// `path` relative to the root; empty for the root itself.
    pub fn relative(&self, path: &GuardedPath) -> PathBuf {
        path.as_path()
            .strip_prefix(&self.path)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Navigation trail from the root down to `path`, root first.
    pub fn breadcrumbs(&self, path: &GuardedPath) -> Vec<Breadcrumb> {
        let root_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut crumbs = vec![Breadcrumb {
            name: root_name,
            path: PathBuf::new(),
        }];

        let mut current = PathBuf::new();
        for component in self.relative(path).components() {
            if let Component::Normal(segment) = component {
                current.push(segment);
                crumbs.push(Breadcrumb {
                    name: segment.to_string_lossy().to_string(),
                    path: current.clone(),
                });
            }
        }

        crumbs
    }
}

/// A path verified to be the root or one of its descendants.
///
/// Only [`Root`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedPath {
    path: PathBuf,
    at_root: bool,
}

impl GuardedPath {
    /// The absolute path.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Whether this is the root itself.
    pub fn is_root(&self) -> bool {
        self.at_root
    }

    /// Consume into the absolute path.
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    /// Final path segment, if any.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }

    /// Follow symlinks and verify the real location is still inside `root`.
    ///
    /// Lexical confinement cannot see through symlinks, so anything that
    /// reads file contents resolves first.
    pub fn resolve(&self, root: &Root) -> Result<GuardedPath> {
        let canonical = fs::canonicalize(&self.path).map_err(|e| ExplorerError::fs(&self.path, e))?;
        if canonical == root.path {
            return Ok(root.guarded());
        }
        if !canonical.starts_with(&root.path) {
            tracing::warn!(
                path = %self.path.display(),
                target = %canonical.display(),
                "Symlink points outside root"
            );
            return Err(ExplorerError::Unauthorized(format!(
                "{} resolves outside the root",
                self.path.display()
            )));
        }
        Ok(GuardedPath {
            path: canonical,
            at_root: false,
        })
    }
}

impl AsRef<Path> for GuardedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Serialize for GuardedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.path.serialize(serializer)
    }
}

/// One step of the navigation trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    /// Display name of the segment.
    pub name: String,
    /// Path relative to the root.
    pub path: PathBuf,
}

/// Lexically normalize a path: drop `.`, apply `..` by popping, never go
/// above the filesystem root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }
    normalized
}
