//! Confined filesystem access: listing, search, download and deletion.
//!
//! This module provides:
//! - Lexical path confinement against a per-user root
//! - Sorted, paginated directory listings
//! - Pluggable search providers
//! - Move-to-trash and permanent deletion
//!
//! # Security
//!
//! Every user-supplied path goes through [`Root::confine`] first. Escapes
//! collapse to the root, which operations needing a concrete target reject.
//! Operations that read file contents additionally resolve symlinks with
//! [`GuardedPath::resolve`].

pub mod classify;
pub mod download;
pub mod guard;
pub mod remove;
pub mod search;
pub mod sort;
pub mod tree;

pub use classify::{classify, Disposition, FileType};
pub use download::{prepare_download, Download};
pub use guard::{Breadcrumb, GuardedPath, Root};
pub use remove::{RemoveMethod, Removal, Remover};
pub use search::{
    prepare_query, search_provider, secure_string, FindSearch, NativeSearch, SearchMethod,
    SearchProvider,
};
pub use sort::{PageSpec, SortKey, SortOrder, SortSpec};
pub use tree::{TreeBuilder, TreeListing, TreeNode, TreeOptions};
