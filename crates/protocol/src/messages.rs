//! Command bus message definitions.
//!
//! The web tier and the job worker exchange these types. Commands are tagged
//! variants, one per command kind, so each carries only the fields it needs.
//! All messages are serialized as JSON.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Topic carried by every archive command.
pub const ARCHIVE_TOPIC: &str = "archive";

// ============================================================================
// Commands
// ============================================================================

/// Key under which a command handler is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Build a zip archive on disk.
    #[serde(rename = "archive.create")]
    ArchiveCreate,
}

impl CommandKind {
    /// Returns the dotted wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::ArchiveCreate => "archive.create",
        }
    }

    /// Returns the topic a command of this kind is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            CommandKind::ArchiveCreate => ARCHIVE_TOPIC,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command for the job worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Command {
    /// Build a zip archive into a file.
    #[serde(rename = "archive.create")]
    ArchiveCreate(ArchiveCreate),
}

impl Command {
    /// Returns the kind used to look up the handler.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ArchiveCreate(_) => CommandKind::ArchiveCreate,
        }
    }
}

/// Payload of an `archive.create` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCreate {
    /// Archive name without the `.zip` extension.
    pub name: String,
    /// Files to add, each stored under its base name.
    pub paths: Vec<PathBuf>,
    /// Directories to add recursively.
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Destination file of the finished archive.
    pub temp: PathBuf,
    /// Confinement root every source must live under.
    pub root: PathBuf,
}

/// Identity of the user on whose behalf a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// Login name.
    pub username: String,
    /// Home directory; never a valid deletion target.
    pub home: PathBuf,
    /// Read-only users may browse and download but not mutate.
    #[serde(default)]
    pub read_only: bool,
}

impl UserContext {
    /// Create a read-write user context.
    pub fn new(username: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            home: home.into(),
            read_only: false,
        }
    }

    /// Mark the user as read-only.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Zip compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Deflate each entry.
    #[default]
    Deflated,
    /// Store entries uncompressed.
    Stored,
}

/// Per-command options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    /// Compression used for archive entries.
    pub compression: Compression,
}

/// Envelope wrapping every command sent over the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Topic the command is published on.
    pub topic: String,
    /// Acting user.
    pub user: UserContext,
    /// Options for the handler.
    #[serde(default)]
    pub options: CommandOptions,
    /// The command itself.
    pub command: Command,
}

impl Envelope {
    /// Create an envelope with the current protocol version and the
    /// command's own topic.
    pub fn new(user: UserContext, command: Command) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            topic: command.kind().topic().to_string(),
            user,
            options: CommandOptions::default(),
            command,
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    /// Reject envelopes produced by a different protocol version.
    pub fn check_version(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                got: self.version,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Identifier assigned to every accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ProtocolError::Deserialization(format!("invalid job id: {}", e)))
    }
}

/// Lifecycle of the job worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No worker has been launched yet.
    Unstarted,
    /// The worker is alive and consuming commands.
    Running,
    /// The worker has stopped; it is never relaunched.
    Exited,
}

/// Snapshot of the worker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current lifecycle state.
    pub state: JobState,
    /// Commands finished, successfully or not.
    pub processed: u64,
    /// Commands that failed.
    pub failed: u64,
    /// Commands waiting in the mailbox.
    pub queued: usize,
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The command ran to completion.
    Completed {
        /// File produced by the command, if any.
        artifact: Option<PathBuf>,
    },
    /// The command failed.
    Failed {
        /// Error classification.
        code: ErrorCode,
        /// Human-readable error message.
        message: String,
    },
}

/// Result of one command, retained by the worker for later lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Id returned when the command was accepted.
    pub job_id: JobId,
    /// Kind of the command.
    pub kind: CommandKind,
    /// User the command ran for.
    pub user: String,
    /// Outcome.
    pub outcome: JobOutcome,
    /// Unix timestamp (seconds) when the command finished.
    pub finished_at: u64,
}

impl JobReport {
    /// Whether the command completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }
}

// ============================================================================
// IPC
// ============================================================================

/// Requests sent to the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRequest {
    /// Check if the worker process is alive.
    Ping,
    /// Get the worker's status.
    Status,
    /// Queue a command. Answered as soon as it is queued.
    Submit(Envelope),
    /// Look up the report of a finished command.
    Report {
        /// Id returned by `Submit`.
        job_id: JobId,
    },
}

/// Responses sent back by the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobResponse {
    /// Response to a Ping request.
    Pong,
    /// Current worker status.
    Status(JobStatus),
    /// The command was queued.
    Accepted {
        /// Id for later report lookups.
        job_id: JobId,
    },
    /// Report of a command; `None` while it is still queued or running.
    Report {
        /// The report, if the command has finished.
        report: Option<JobReport>,
    },
    /// An error occurred processing the request.
    Error {
        /// Error classification.
        code: ErrorCode,
        /// Human-readable error message.
        message: String,
    },
}
