//! Directory listings.
//!
//! A listing is built fresh for every request: enumerate, classify, sort,
//! paginate, then attach navigation metadata. Nothing is cached and nothing
//! is mutated, so a listing can be discarded or retried freely.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::classify::{classify, FileType};
use super::guard::{Breadcrumb, GuardedPath, Root};
use super::sort::{PageSpec, SortSpec};
use crate::error::{ExplorerError, Result};

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    /// Base name.
    pub name: String,
    /// Absolute path, inside the root.
    pub path: PathBuf,
    /// Path relative to the root.
    pub relative: PathBuf,
    /// Parent directory relative to the root; shown for search results.
    pub location: PathBuf,
    /// Whether the entry is a directory (symlinks are followed).
    pub is_directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Coarse type classification.
    pub file_type: FileType,
}

impl TreeNode {
    fn new(root: &Root, path: &GuardedPath, metadata: &Metadata) -> Self {
        let is_directory = metadata.is_dir();
        let relative = root.relative(path);
        let location = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Self {
            name: path.file_name().unwrap_or_default(),
            path: path.as_path().to_path_buf(),
            relative,
            location,
            is_directory,
            size: if metadata.is_file() { metadata.len() } else { 0 },
            modified: DateTime::<Utc>::from(modified),
            file_type: classify(path.as_path(), is_directory),
        }
    }
}

/// Options for one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Sort key and direction.
    pub sort: SortSpec,
    /// Page to return.
    pub page: PageSpec,
    /// Include entries whose name starts with `.`.
    pub show_hidden: bool,
}

impl TreeOptions {
    /// Create listing options.
    pub fn new(sort: SortSpec, page: PageSpec) -> Self {
        Self {
            sort,
            page,
            show_hidden: false,
        }
    }

    /// Set whether hidden entries are listed.
    pub fn show_hidden(mut self, show: bool) -> Self {
        self.show_hidden = show;
        self
    }
}

/// A sorted, paginated view of a directory or of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeListing {
    /// Listed directory relative to the root.
    pub path: PathBuf,
    /// Parent directory relative to the root; `None` at the root.
    pub parent: Option<PathBuf>,
    /// Navigation trail, root first.
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Entries of the requested page.
    pub entries: Vec<TreeNode>,
    /// Entries across all pages.
    pub total: usize,
    /// Returned page (1-based).
    pub page: usize,
    /// Page size used.
    pub page_size: usize,
    /// Number of pages.
    pub pages: usize,
    /// Sort applied.
    pub sort: SortSpec,
    /// Search query that produced the entries, if any.
    pub search: Option<String>,
}

/// Builds listings under a single root.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    root: Root,
}

impl TreeBuilder {
    /// Create a builder confined to `root`.
    pub fn new(root: Root) -> Self {
        Self { root }
    }

    /// The confinement root.
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// List the direct children of `path`.
    ///
    /// Fails with `NotFound` or `Filesystem` when the directory cannot be
    /// read and with `NotADirectory` when `path` is a file.
    pub async fn build(&self, path: &GuardedPath, options: &TreeOptions) -> Result<TreeListing> {
        self.check_confined(path)?;
        let real = path.resolve(&self.root)?;

        let root = self.root.clone();
        let dir = path.clone();
        let show_hidden = options.show_hidden;
        let nodes = tokio::task::spawn_blocking(move || {
            read_children(&root, &dir, real.as_path(), show_hidden)
        })
        .await??;

        tracing::debug!(
            path = %path.as_path().display(),
            entries = nodes.len(),
            "Listed directory"
        );

        Ok(self.finish(path, nodes, options, None))
    }

    /// List an arbitrary set of matching paths, e.g. search results.
    ///
    /// Candidates outside the root, the root itself, duplicates and entries
    /// that cannot be stat'ed are dropped. Provider order is kept when no
    /// sort key is given.
    pub async fn build_from_paths(
        &self,
        paths: Vec<PathBuf>,
        options: &TreeOptions,
        search: &str,
    ) -> Result<TreeListing> {
        let root = self.root.clone();
        let show_hidden = options.show_hidden;
        let nodes =
            tokio::task::spawn_blocking(move || stat_candidates(&root, paths, show_hidden)).await?;

        let at_root = self.root.guarded();
        Ok(self.finish(&at_root, nodes, options, Some(search.to_string())))
    }

    fn check_confined(&self, path: &GuardedPath) -> Result<()> {
        if path.as_path().starts_with(self.root.as_path()) {
            Ok(())
        } else {
            Err(ExplorerError::Unauthorized(format!(
                "{} is not under {}",
                path.as_path().display(),
                self.root.as_path().display()
            )))
        }
    }

    fn finish(
        &self,
        path: &GuardedPath,
        mut nodes: Vec<TreeNode>,
        options: &TreeOptions,
        search: Option<String>,
    ) -> TreeListing {
        options.sort.apply(&mut nodes);

        let total = nodes.len();
        let page = options.page;
        let parent = if path.is_root() {
            None
        } else {
            Some(self.root.relative(&self.root.parent_of(path)))
        };

        TreeListing {
            path: self.root.relative(path),
            parent,
            breadcrumbs: self.root.breadcrumbs(path),
            entries: page.slice(nodes),
            total,
            page: page.page,
            page_size: page.page_size,
            pages: page.page_count(total),
            sort: options.sort,
            search,
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Children of `real` (the resolved `dir`), named under `dir`.
fn read_children(
    root: &Root,
    dir: &GuardedPath,
    real: &Path,
    show_hidden: bool,
) -> Result<Vec<TreeNode>> {
    let metadata = fs::metadata(real).map_err(|e| ExplorerError::fs(dir, e))?;
    if !metadata.is_dir() {
        return Err(ExplorerError::NotADirectory(dir.as_path().to_path_buf()));
    }

    let entries = fs::read_dir(real).map_err(|e| ExplorerError::fs(dir, e))?;
    let mut nodes = Vec::new();

    for entry_result in entries {
        let entry = match entry_result {
            Ok(e) => e,
            Err(_) => continue,
        };

        let name = entry.file_name().to_string_lossy().to_string();
        if !show_hidden && is_hidden(&name) {
            continue;
        }

        // Follows symlinks; broken links are skipped.
        let metadata = match fs::metadata(entry.path()) {
            Ok(m) => m,
            Err(_) => continue,
        };

        let child = root.confine(dir.as_path().join(entry.file_name()));
        if child.is_root() || !stays_inside(root, &child) {
            continue;
        }
        nodes.push(TreeNode::new(root, &child, &metadata));
    }

    Ok(nodes)
}

/// Symlinked entries pointing outside the root are not listed.
fn stays_inside(root: &Root, path: &GuardedPath) -> bool {
    path.resolve(root).is_ok()
}

fn stat_candidates(root: &Root, paths: Vec<PathBuf>, show_hidden: bool) -> Vec<TreeNode> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();

    for candidate in paths {
        let guarded = root.confine(&candidate);
        if guarded.is_root() || !seen.insert(guarded.as_path().to_path_buf()) {
            continue;
        }

        if !show_hidden && guarded.file_name().is_some_and(|n| is_hidden(&n)) {
            continue;
        }

        if !stays_inside(root, &guarded) {
            continue;
        }

        let metadata = match fs::metadata(&guarded) {
            Ok(m) => m,
            Err(_) => continue,
        };
        nodes.push(TreeNode::new(root, &guarded, &metadata));
    }

    nodes
}
