//! # Explorer Library
//!
//! This crate provides the core of Explorer: confined file browsing for a
//! web front end, and the background job worker that builds archives
//! outside the request/response cycle.
//!
//! ## Overview
//!
//! - **Confinement**: every user path is resolved lexically against the
//!   user's root and collapses to the root when it tries to escape
//! - **Listings**: sorted, paginated directory listings and search results
//! - **Actions**: zip downloads, background archives and deletion
//! - **Job Worker**: a single supervised task with a bounded mailbox,
//!   reachable in-process or over a Unix socket
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Explorer                             │
//! │  prepare_tree / tree / download / perform / empty_trash      │
//! ├──────────────┬──────────────┬──────────────┬─────────────────┤
//! │     Root     │ TreeBuilder  │   Remover    │  ArchivePlugin  │
//! │ (confinement)│  + Search    │ (mv / rm)    │  (inline zip)   │
//! └──────────────┴──────────────┴──────────────┴────────┬────────┘
//!                                                       │ Dispatcher
//!                         ┌─────────────────────────────▼────────┐
//!                         │ JobInteractor ── HandlerRegistry     │
//!                         │   (single worker, bounded mailbox)   │
//!                         │        └─► ArchivePlugin (file)      │
//!                         └──────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use explorer::{Config, Explorer, Root, TreeQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let explorer = Explorer::new(config);
//!
//!     let root = Root::new("/home/alice")?;
//!     let query = TreeQuery {
//!         path: Some("documents".to_string()),
//!         sort: Some("date".to_string()),
//!         order: Some("desc".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let listing = explorer.tree(&root, &query).await?;
//!     for entry in &listing.entries {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`files`]: Confinement, listings, search, download and deletion
//! - [`archive`]: Zip creation and the `archive.create` handler
//! - [`jobs`]: The job worker, handler registry and dispatch
//! - [`ipc`]: Unix socket server and client for the job worker
//! - [`actions`]: Query normalization and action dispatch
//! - [`config`]: Configuration loading and defaults
//! - [`error`]: Error types

pub mod actions;
pub mod archive;
pub mod config;
pub mod error;
pub mod files;
pub mod ipc;
pub mod jobs;

// Re-export protocol for convenience
pub use protocol;

pub use actions::{Action, ActionOutcome, ActionRequest, Explorer, PreparedTree, TreeQuery};
pub use archive::{ArchiveOutput, ArchivePlugin, ArchiveRequest, ArchiveSummary};
pub use config::Config;
pub use error::{ExplorerError, Result};
pub use files::{
    Download, GuardedPath, Removal, Remover, Root, SearchProvider, SortKey, SortOrder, SortSpec,
    TreeBuilder, TreeListing, TreeNode, TreeOptions,
};
pub use ipc::{IpcClient, IpcDispatcher, IpcServer};
pub use jobs::{CommandHandler, Dispatcher, HandlerRegistry, JobInteractor};
