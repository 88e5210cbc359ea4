//! Configuration management for Explorer.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/explorer/config.toml`.
//! Every section falls back to its defaults, so an empty file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::guard::normalize;
use crate::files::remove::RemoveMethod;
use crate::files::search::SearchMethod;
use crate::files::sort::SortKey;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("page_size must be greater than 0")]
    InvalidPageSize,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("{0} must not be empty")]
    EmptyPath(&'static str),

    #[error("mailbox_capacity must be greater than 0")]
    InvalidMailboxCapacity,

    #[error("max_results must be greater than 0")]
    InvalidMaxResults,

    #[error("sort.allowed must list at least one key")]
    EmptySortWhitelist,

    #[error("remove.path must not be the root directory: {0}")]
    TrashIsRoot(PathBuf),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-level settings.
    pub daemon: DaemonConfig,

    /// Listing settings.
    pub tree: TreeConfig,

    /// Pagination defaults.
    pub pagination: PaginationConfig,

    /// Sort key whitelist.
    pub sort: SortConfig,

    /// Search provider selection.
    pub search: SearchConfig,

    /// Deletion behaviour.
    pub remove: RemoveConfig,

    /// Archive creation.
    pub archive: ArchiveConfig,

    /// Job worker limits.
    pub jobs: JobsConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for the PID file and other runtime state.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Job worker socket; defaults to `$XDG_RUNTIME_DIR/explorer/jobs.sock`.
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TreeConfig {
    /// List entries whose name starts with `.`.
    pub show_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaginationConfig {
    /// Entries per page.
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SortConfig {
    /// Keys accepted from queries; anything else means "no sort".
    pub allowed: Vec<SortKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Search strategy.
    pub method: SearchMethod,

    /// Upper bound on candidates returned by a provider.
    pub max_results: usize,

    /// Program used by the `find` method.
    pub find_program: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoveConfig {
    /// `mv` moves into the trash, `rm` deletes permanently.
    pub method: RemoveMethod,

    /// Trash directory.
    pub path: PathBuf,

    /// Refuse every deletion.
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory background archives are written to.
    pub path: PathBuf,

    /// Refuse every archive request.
    pub disabled: bool,

    /// Entry compression.
    pub compression: Compression,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Commands that may wait for the worker before submissions are refused.
    pub mailbox_capacity: usize,

    /// Finished job reports kept for lookup.
    pub report_history: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            socket_path: None,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            allowed: SortKey::ALL.to_vec(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            method: SearchMethod::Native,
            max_results: 1000,
            find_program: PathBuf::from("find"),
        }
    }
}

impl Default for RemoveConfig {
    fn default() -> Self {
        Self {
            method: RemoveMethod::Mv,
            path: default_data_dir().join("trash"),
            disabled: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("explorer"),
            disabled: false,
            compression: Compression::Deflated,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            report_history: 256,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("explorer")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("explorer")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - EXPLORER_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - EXPLORER_SOCKET: Override the job worker socket path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("EXPLORER_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(socket) = std::env::var("EXPLORER_SOCKET") {
            if !socket.is_empty() {
                tracing::info!("Overriding socket_path from environment: {}", socket);
                self.daemon.socket_path = Some(PathBuf::from(socket));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pagination.page_size == 0 {
            return Err(ConfigError::InvalidPageSize);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.remove.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("remove.path"));
        }

        if self.archive.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("archive.path"));
        }

        if self.jobs.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidMailboxCapacity);
        }

        if self.search.max_results == 0 {
            return Err(ConfigError::InvalidMaxResults);
        }

        if self.sort.allowed.is_empty() {
            return Err(ConfigError::EmptySortWhitelist);
        }

        Ok(())
    }

    /// Reject a trash directory that is the confinement root itself.
    pub fn check_root(&self, root: &Path) -> Result<(), ConfigError> {
        if same_location(&self.remove.path, root) {
            return Err(ConfigError::TrashIsRoot(self.remove.path.clone()));
        }
        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Compare two paths after resolving symlinks where they exist.
pub(crate) fn same_location(a: &Path, b: &Path) -> bool {
    let resolve = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| normalize(p));
    resolve(a) == resolve(b)
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
