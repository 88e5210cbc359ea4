//! # Explorer Protocol Library
//!
//! This crate defines the command bus spoken between the web tier and the
//! Explorer job worker.
//!
//! ## Overview
//!
//! - **Commands**: tagged variants, one per command kind (`archive.create`)
//! - **Envelope**: version, topic, acting user and options around a command
//! - **Jobs**: worker state, per-command reports and ids
//! - **Line Codec**: newline-delimited JSON framing with a size limit
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      JobRequest / JobResponse           │  JSON
//! ├─────────────────────────────────────────┤
//! │            Line framing                 │  '\n' delimited
//! ├─────────────────────────────────────────┤
//! │         Unix Domain Socket              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use std::path::PathBuf;
//! use protocol::{ArchiveCreate, Command, Envelope, JobRequest, LineCodec, UserContext};
//!
//! let command = Command::ArchiveCreate(ArchiveCreate {
//!     name: "photos".to_string(),
//!     paths: vec![PathBuf::from("/home/alice/a.jpg")],
//!     directories: Vec::new(),
//!     temp: PathBuf::from("/tmp/photos.zip"),
//!     root: PathBuf::from("/home/alice"),
//! });
//! let envelope = Envelope::new(UserContext::new("alice", "/home/alice"), command);
//!
//! let line = LineCodec::new().encode(&JobRequest::Submit(envelope)).unwrap();
//! assert_eq!(line.last(), Some(&b'\n'));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Command, envelope, job and IPC message definitions
//! - [`framing`]: Line codec
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ErrorCode, ProtocolError, Result};
pub use framing::{LineCodec, LINE_DELIMITER, MAX_LINE_SIZE};
pub use messages::{
    ArchiveCreate, Command, CommandKind, CommandOptions, Compression, Envelope, JobId,
    JobOutcome, JobReport, JobRequest, JobResponse, JobState, JobStatus, UserContext,
    ARCHIVE_TOPIC, PROTOCOL_VERSION,
};
