//! Error taxonomy shared by the listing engine, the job worker and the
//! mutating actions.

use std::io;
use std::path::{Path, PathBuf};

use protocol::{CommandKind, ErrorCode, ProtocolError};
use thiserror::Error;

/// Errors surfaced by explorer operations.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// The path escapes confinement or the user may not act on it.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The action is disabled or otherwise disallowed by configuration.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    /// A directory was required.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A file was required.
    #[error("path is a directory: {0}")]
    IsADirectory(PathBuf),

    /// Underlying I/O failure.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// Path the operation was acting on.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: io::Error,
    },

    /// Unrecognized mutating action.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// A job worker is already alive.
    #[error("job interactor already running")]
    AlreadyRunning,

    /// No job worker has been launched.
    #[error("job interactor is not running")]
    NotRunning,

    /// The job worker stopped and cannot be relaunched.
    #[error("job worker has exited")]
    WorkerExited,

    /// The worker's mailbox is full.
    #[error("job mailbox is full ({0} commands queued)")]
    MailboxFull(usize),

    /// No handler is registered for the command.
    #[error("no handler registered for command {0}")]
    UnknownCommand(CommandKind),

    /// Zip encoding failed.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A command bus message was rejected.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The job worker refused a submitted command.
    #[error("job worker rejected command: {message}")]
    Rejected {
        /// Code reported by the worker.
        code: ErrorCode,
        /// Message reported by the worker.
        message: String,
    },

    /// A search provider failed.
    #[error("search failed: {0}")]
    Search(String),

    /// A blocking task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for explorer operations.
pub type Result<T> = std::result::Result<T, ExplorerError>;

impl ExplorerError {
    /// Wrap an I/O error for `path`, mapping "not found" to [`ExplorerError::NotFound`].
    pub fn fs(path: impl AsRef<Path>, err: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => ExplorerError::NotFound(path),
            _ => ExplorerError::Filesystem { path, source: err },
        }
    }

    /// Returns the wire-level code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ExplorerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ExplorerError::Forbidden(_) => ErrorCode::Forbidden,
            ExplorerError::NotFound(_) => ErrorCode::NotFound,
            ExplorerError::NotADirectory(_)
            | ExplorerError::IsADirectory(_)
            | ExplorerError::Filesystem { .. } => ErrorCode::Filesystem,
            ExplorerError::InvalidAction(_) => ErrorCode::InvalidAction,
            ExplorerError::AlreadyRunning => ErrorCode::AlreadyRunning,
            ExplorerError::NotRunning | ExplorerError::WorkerExited => ErrorCode::NotRunning,
            ExplorerError::MailboxFull(_)
            | ExplorerError::UnknownCommand(_)
            | ExplorerError::Protocol(_) => ErrorCode::InvalidRequest,
            ExplorerError::Rejected { code, .. } => *code,
            ExplorerError::Archive(_) | ExplorerError::Search(_) | ExplorerError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }
}

impl From<tokio::task::JoinError> for ExplorerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExplorerError::Internal(err.to_string())
    }
}
