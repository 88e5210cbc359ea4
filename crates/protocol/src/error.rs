//! Error types for the protocol crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A framed line exceeds the maximum allowed size.
    #[error("line too large: {size} bytes exceeds maximum of {max} bytes")]
    LineTooLarge {
        /// Actual line size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version: expected {expected}, got {got}")]
    UnsupportedVersion {
        /// Version this build understands.
        expected: u8,
        /// Version found in the envelope.
        got: u8,
    },

    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

/// Wire-level error classification shared by every process on the bus.
///
/// These codes are what a remote caller sees; the richer error enums of the
/// explorer crate collapse into one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Path escapes confinement, or the user may not perform the action.
    Unauthorized,
    /// Action disallowed by configuration.
    Forbidden,
    /// The target does not exist.
    NotFound,
    /// Underlying I/O failure.
    Filesystem,
    /// Unrecognized mutating action.
    InvalidAction,
    /// A job worker is already alive.
    AlreadyRunning,
    /// No job worker is alive.
    NotRunning,
    /// The request was malformed.
    InvalidRequest,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Returns the snake_case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Filesystem => "filesystem",
            ErrorCode::InvalidAction => "invalid_action",
            ErrorCode::AlreadyRunning => "already_running",
            ErrorCode::NotRunning => "not_running",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
