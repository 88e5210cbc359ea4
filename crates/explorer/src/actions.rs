//! Request-level entry points for the web tier and the CLI.
//!
//! [`Explorer`] ties configuration to the engine: it turns raw tree query
//! strings into listing options, and carries out the mutating actions
//! (`download`, `archive`, `remove`) after the read-only and configuration
//! checks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use protocol::{ArchiveCreate, Command, CommandOptions, Envelope, JobId, UserContext};
use serde::Serialize;
use tokio::io::AsyncWrite;

use crate::archive::{archive_name, ArchiveOutput, ArchivePlugin, ArchiveRequest, ArchiveSummary};
use crate::config::Config;
use crate::error::{ExplorerError, Result};
use crate::files::{
    prepare_download, prepare_query, search_provider, Download, GuardedPath, PageSpec, Removal,
    Remover, Root, SearchProvider, SortSpec, TreeBuilder, TreeListing, TreeOptions,
};
use crate::jobs::Dispatcher;

/// A mutating action on a set of paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Stream a zip of the selection to the caller.
    Download,
    /// Build a zip in the background.
    Archive,
    /// Delete the selection.
    Remove,
}

impl Action {
    /// Query value naming this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Download => "download",
            Action::Archive => "archive",
            Action::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "download" => Ok(Action::Download),
            "archive" => Ok(Action::Archive),
            "remove" => Ok(Action::Remove),
            other => Err(ExplorerError::InvalidAction(other.to_string())),
        }
    }
}

/// Raw listing parameters as received from a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeQuery {
    /// Directory relative to the root.
    pub path: Option<String>,
    /// Sort key name.
    pub sort: Option<String>,
    /// `asc` or `desc`.
    pub order: Option<String>,
    /// 1-based page number.
    pub page: Option<String>,
    /// Search query.
    pub search: Option<String>,
}

/// A [`TreeQuery`] after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTree {
    /// Directory to list.
    pub path: GuardedPath,
    /// Sort, page and visibility options.
    pub options: TreeOptions,
    /// Non-empty search query, as the active provider should receive it.
    pub search: Option<String>,
}

/// A mutating action and its selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// What to do.
    pub action: Action,
    /// Selected paths, relative to the root.
    pub paths: Vec<PathBuf>,
    /// Directories to archive recursively.
    pub directories: Vec<PathBuf>,
    /// Archive name.
    pub name: Option<String>,
}

impl ActionRequest {
    /// Request `action` on `paths`.
    pub fn new(action: Action, paths: Vec<PathBuf>) -> Self {
        Self {
            action,
            paths,
            directories: Vec::new(),
            name: None,
        }
    }

    /// Directories to recurse into when archiving.
    pub fn directories(mut self, directories: Vec<PathBuf>) -> Self {
        self.directories = directories;
        self
    }

    /// Archive name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// What an action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The zip was written to the caller's stream.
    Streamed(ArchiveSummary),
    /// A background archive was queued.
    Accepted {
        /// Id for the job report.
        job_id: JobId,
        /// Where the archive will appear.
        destination: PathBuf,
    },
    /// Paths were removed.
    Removed {
        /// One entry per removed path.
        removals: Vec<Removal>,
    },
}

/// Configured front door to the listing engine and the mutating actions.
pub struct Explorer {
    config: Config,
    search: Arc<dyn SearchProvider>,
    remover: Remover,
    archiver: ArchivePlugin,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl Explorer {
    /// Build from configuration. Background archives are refused until a
    /// dispatcher is attached.
    pub fn new(config: Config) -> Self {
        let search = search_provider(&config.search, config.tree.show_hidden);
        let remover = Remover::from_config(&config.remove);
        Self {
            config,
            search,
            remover,
            archiver: ArchivePlugin::new(),
            dispatcher: None,
        }
    }

    /// Send background archives through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the configured search provider.
    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = provider;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalize raw listing parameters.
    ///
    /// A missing path lists the root and a page that is missing, malformed
    /// or below 1 becomes 1. Unknown or non-whitelisted sort keys mean "no
    /// sort", anything but `desc` is ascending, and a blank search is none.
    pub fn prepare_tree(&self, root: &Root, query: &TreeQuery) -> PreparedTree {
        let path = match query.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => root.confine(path),
            _ => root.guarded(),
        };

        let page = query
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(1);

        let sort = SortSpec::from_query(
            query.sort.as_deref(),
            query.order.as_deref(),
            &self.config.sort.allowed,
        );

        let options = TreeOptions::new(sort, PageSpec::new(page, self.config.pagination.page_size))
            .show_hidden(self.config.tree.show_hidden);

        let search = query
            .search
            .as_deref()
            .map(|raw| prepare_query(self.search.as_ref(), raw))
            .filter(|q| !q.is_empty());

        PreparedTree {
            path,
            options,
            search,
        }
    }

    /// List a directory, or the search results when a query is given.
    pub async fn tree(&self, root: &Root, query: &TreeQuery) -> Result<TreeListing> {
        let prepared = self.prepare_tree(root, query);
        let builder = TreeBuilder::new(root.clone());

        match prepared.search {
            Some(search) => {
                tracing::debug!(
                    provider = self.search.name(),
                    query = %search,
                    "Searching"
                );
                let paths = self.search.search(&search, root).await?;
                builder
                    .build_from_paths(paths, &prepared.options, &search)
                    .await
            }
            None => builder.build(&prepared.path, &prepared.options).await,
        }
    }

    /// Describe a single file for download.
    pub async fn download(&self, root: &Root, path: impl AsRef<Path>) -> Result<Download> {
        prepare_download(root, path).await
    }

    /// Carry out `request` for `user`.
    ///
    /// `sink` receives the zip for [`Action::Download`] and is ignored
    /// otherwise. Read-only users may only download; disabled archiving or
    /// removal is `Forbidden`.
    pub async fn perform(
        &self,
        user: &UserContext,
        root: &Root,
        request: ActionRequest,
        sink: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    ) -> Result<ActionOutcome> {
        let action = request.action;
        if user.read_only && action != Action::Download {
            return Err(ExplorerError::Unauthorized(format!(
                "{} is read-only and may not {}",
                user.username, action
            )));
        }

        tracing::info!(
            %action,
            user = %user.username,
            paths = request.paths.len(),
            directories = request.directories.len(),
            "Performing action"
        );

        match action {
            Action::Download => {
                let sink = sink.ok_or_else(|| {
                    ExplorerError::InvalidAction("download requires an output stream".to_string())
                })?;
                let archive = self.archive_request(root, &request).await?;
                let summary = self
                    .archiver
                    .create(archive, self.command_options(), ArchiveOutput::Stream(sink))
                    .await?;
                Ok(ActionOutcome::Streamed(summary))
            }
            Action::Archive => {
                let dispatcher = self
                    .dispatcher
                    .as_ref()
                    .ok_or(ExplorerError::NotRunning)?;
                let archive = self.archive_request(root, &request).await?;
                let envelope = self.archive_envelope(user, root, &archive);
                let destination = match &envelope.command {
                    Command::ArchiveCreate(command) => command.temp.clone(),
                };
                let job_id = dispatcher.dispatch(envelope).await?;
                tracing::info!(%job_id, destination = %destination.display(), "Archive queued");
                Ok(ActionOutcome::Accepted {
                    job_id,
                    destination,
                })
            }
            Action::Remove => {
                if self.config.remove.disabled {
                    return Err(ExplorerError::Forbidden("removal is disabled".to_string()));
                }
                let mut removals = Vec::with_capacity(request.paths.len());
                for path in &request.paths {
                    let target = root.confine(path);
                    removals.push(self.remover.remove(root, &user.home, &target).await?);
                }
                Ok(ActionOutcome::Removed { removals })
            }
        }
    }

    /// Permanently clear the trash.
    pub async fn empty_trash(&self, user: &UserContext, root: &Root) -> Result<usize> {
        if user.read_only {
            return Err(ExplorerError::Unauthorized(format!(
                "{} is read-only",
                user.username
            )));
        }
        self.remover.empty_trash(root).await
    }

    /// Envelope that asks the worker to build `archive` into the archive
    /// directory.
    pub fn archive_envelope(
        &self,
        user: &UserContext,
        root: &Root,
        archive: &ArchiveRequest,
    ) -> Envelope {
        let temp = self.config.archive.path.join(archive.file_name());
        let command = Command::ArchiveCreate(ArchiveCreate {
            name: archive.name().to_string(),
            paths: archive
                .files()
                .iter()
                .map(|p| p.as_path().to_path_buf())
                .collect(),
            directories: archive
                .directories()
                .iter()
                .map(|p| p.as_path().to_path_buf())
                .collect(),
            temp,
            root: root.as_path().to_path_buf(),
        });
        Envelope::new(user.clone(), command).with_options(self.command_options())
    }

    async fn archive_request(&self, root: &Root, request: &ActionRequest) -> Result<ArchiveRequest> {
        if self.config.archive.disabled {
            return Err(ExplorerError::Forbidden("archiving is disabled".to_string()));
        }
        if request.paths.is_empty() && request.directories.is_empty() {
            return Err(ExplorerError::InvalidAction(
                "nothing selected to archive".to_string(),
            ));
        }

        let root = root.clone();
        let name = archive_name(request.name.as_deref());
        let paths = request.paths.clone();
        let directories = request.directories.clone();
        tokio::task::spawn_blocking(move || ArchiveRequest::new(root, &name, &paths, &directories))
            .await?
    }

    fn command_options(&self) -> CommandOptions {
        CommandOptions {
            compression: self.config.archive.compression,
        }
    }
}

impl fmt::Debug for Explorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Explorer")
            .field("search", &self.search.name())
            .field("remover", &self.remover)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish()
    }
}
