//! Newline-delimited JSON framing.
//!
//! # Line Format
//!
//! Each message is a single JSON document followed by `\n`. JSON never
//! contains a raw newline, so a line is always exactly one message.
//! Lines longer than [`MAX_LINE_SIZE`] are rejected on both ends.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Maximum line size including the trailing newline (1 MB).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Line delimiter.
pub const LINE_DELIMITER: u8 = b'\n';

/// Codec for newline-delimited JSON messages.
#[derive(Debug, Clone, Copy)]
pub struct LineCodec {
    max_line_size: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a codec with the default size limit.
    pub fn new() -> Self {
        Self {
            max_line_size: MAX_LINE_SIZE,
        }
    }

    /// Create a codec with a custom size limit.
    pub fn with_max_line_size(max_line_size: usize) -> Self {
        Self { max_line_size }
    }

    /// Maximum accepted line size.
    #[inline]
    pub fn max_line_size(&self) -> usize {
        self.max_line_size
    }

    /// Encode a message into a newline-terminated line.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(message)?;
        line.push(LINE_DELIMITER);

        if line.len() > self.max_line_size {
            return Err(ProtocolError::LineTooLarge {
                size: line.len(),
                max: self.max_line_size,
            });
        }

        Ok(line)
    }

    /// Decode one line, with or without its trailing newline.
    pub fn decode<T: DeserializeOwned>(&self, line: &[u8]) -> Result<T> {
        if line.len() > self.max_line_size {
            return Err(ProtocolError::LineTooLarge {
                size: line.len(),
                max: self.max_line_size,
            });
        }

        let trimmed = trim_line(line);
        if trimmed.is_empty() {
            return Err(ProtocolError::Deserialization("empty line".to_string()));
        }

        Ok(serde_json::from_slice(trimmed)?)
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && line[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let mut start = 0;
    while start < end && line[start].is_ascii_whitespace() {
        start += 1;
    }
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{JobRequest, JobResponse};

    #[test]
    fn test_encode_appends_newline() {
        let codec = LineCodec::new();
        let line = codec.encode(&JobRequest::Ping).unwrap();
        assert_eq!(line, b"\"Ping\"\n");
    }

    #[test]
    fn test_decode_accepts_crlf() {
        let codec = LineCodec::new();
        let request: JobRequest = codec.decode(b"\"Status\"\r\n").unwrap();
        assert_eq!(request, JobRequest::Status);
    }

    #[test]
    fn test_decode_empty_line() {
        let codec = LineCodec::new();
        let result = codec.decode::<JobResponse>(b"  \n");
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_decode_garbage() {
        let codec = LineCodec::new();
        let result = codec.decode::<JobResponse>(b"{\"Nope\": 1}\n");
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_encode_too_large() {
        let codec = LineCodec::with_max_line_size(8);
        let result = codec.encode(&JobResponse::Error {
            code: crate::ErrorCode::Internal,
            message: "this message is far too long".to_string(),
        });
        assert!(matches!(result, Err(ProtocolError::LineTooLarge { max: 8, .. })));
    }

    #[test]
    fn test_decode_too_large() {
        let codec = LineCodec::with_max_line_size(4);
        let result = codec.decode::<JobRequest>(b"\"Ping\"\n");
        assert!(matches!(result, Err(ProtocolError::LineTooLarge { .. })));
    }
}
