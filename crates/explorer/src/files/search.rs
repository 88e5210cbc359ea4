//! Search providers.
//!
//! A provider turns `(query, root)` into a flat list of candidate absolute
//! paths. Classification, sorting and pagination are left to
//! [`TreeBuilder::build_from_paths`](super::tree::TreeBuilder::build_from_paths).

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::guard::Root;
use crate::config::SearchConfig;
use crate::error::{ExplorerError, Result};

/// Available search strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// In-process recursive scan.
    #[default]
    Native,
    /// The system `find` program.
    Find,
}

/// A pluggable path lookup.
pub trait SearchProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the provider takes the raw query safely. Untrusted providers
    /// get the query through [`secure_string`] first.
    fn trusted(&self) -> bool;

    /// Find entries under `root` whose name contains `query`, ignoring case.
    fn search<'a>(
        &'a self,
        query: &'a str,
        root: &'a Root,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PathBuf>>> + Send + 'a>>;
}

/// Build the provider selected by configuration.
pub fn search_provider(config: &SearchConfig, show_hidden: bool) -> Arc<dyn SearchProvider> {
    match config.method {
        SearchMethod::Native => Arc::new(
            NativeSearch::new(config.max_results).skip_hidden(!show_hidden),
        ),
        SearchMethod::Find => Arc::new(
            FindSearch::new(config.find_program.clone(), config.max_results)
                .skip_hidden(!show_hidden),
        ),
    }
}

/// Keep only characters that are inert for `find` patterns: letters,
/// digits, whitespace, `.`, `-` and `_`.
pub fn secure_string(query: &str) -> String {
    query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '.' | '-' | '_'))
        .collect()
}

/// The query as `provider` should receive it.
pub fn prepare_query(provider: &dyn SearchProvider, raw: &str) -> String {
    let query = raw.trim();
    if provider.trusted() {
        query.to_string()
    } else {
        secure_string(query).trim().to_string()
    }
}

/// Recursive scan with `walkdir` on a blocking thread.
#[derive(Debug, Clone)]
pub struct NativeSearch {
    max_results: usize,
    skip_hidden: bool,
}

impl NativeSearch {
    /// Create a scanner returning at most `max_results` paths.
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results,
            skip_hidden: true,
        }
    }

    /// Whether hidden entries (and everything under hidden directories) are
    /// skipped.
    pub fn skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    fn scan(&self, query: &str, root: &Root) -> Vec<PathBuf> {
        let needle = query.to_lowercase();
        let skip_hidden = self.skip_hidden;

        WalkDir::new(root.as_path())
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !(skip_hidden && entry.file_name().to_string_lossy().starts_with('.'))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&needle)
            })
            .take(self.max_results)
            .map(|entry| entry.into_path())
            .collect()
    }
}

impl SearchProvider for NativeSearch {
    fn name(&self) -> &'static str {
        "native"
    }

    fn trusted(&self) -> bool {
        true
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        root: &'a Root,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PathBuf>>> + Send + 'a>> {
        Box::pin(async move {
            if query.is_empty() {
                return Ok(Vec::new());
            }

            let scanner = self.clone();
            let query = query.to_string();
            let root = root.clone();
            let paths = tokio::task::spawn_blocking(move || scanner.scan(&query, &root)).await?;
            Ok(paths)
        })
    }
}

/// Delegates to the system `find` program.
///
/// The program is spawned directly with an argument vector, never through a
/// shell; the query is still reduced by [`secure_string`] because it ends up
/// inside a glob pattern.
#[derive(Debug, Clone)]
pub struct FindSearch {
    program: PathBuf,
    max_results: usize,
    skip_hidden: bool,
}

impl FindSearch {
    /// Create a provider running `program`.
    pub fn new(program: impl Into<PathBuf>, max_results: usize) -> Self {
        Self {
            program: program.into(),
            max_results,
            skip_hidden: true,
        }
    }

    /// Whether hidden entries are pruned.
    pub fn skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    fn command(&self, query: &str, root: &Root) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.arg(root.as_path()).args(["-mindepth", "1"]);
        if self.skip_hidden {
            command.args(["-name", ".*", "-prune", "-o"]);
        }
        command
            .arg("-iname")
            .arg(format!("*{}*", query))
            .arg("-print")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl SearchProvider for FindSearch {
    fn name(&self) -> &'static str {
        "find"
    }

    fn trusted(&self) -> bool {
        false
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        root: &'a Root,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PathBuf>>> + Send + 'a>> {
        Box::pin(async move {
            if query.is_empty() {
                return Ok(Vec::new());
            }

            let output = self.command(query, root).output().await.map_err(|e| {
                ExplorerError::Search(format!("failed to run {}: {}", self.program.display(), e))
            })?;

            // find exits non-zero on unreadable subdirectories but still
            // prints what it could reach.
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if output.stdout.is_empty() {
                    return Err(ExplorerError::Search(format!(
                        "{} exited with {}: {}",
                        self.program.display(),
                        output.status,
                        stderr.trim()
                    )));
                }
                tracing::warn!(
                    program = %self.program.display(),
                    status = %output.status,
                    "Search finished with errors: {}",
                    stderr.trim()
                );
            }

            let paths = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|line| !line.is_empty())
                .take(self.max_results)
                .map(PathBuf::from)
                .collect();
            Ok(paths)
        })
    }
}
