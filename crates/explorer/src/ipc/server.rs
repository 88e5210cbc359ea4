//! IPC server for the job worker's Unix socket.
//!
//! The server listens on a Unix socket and accepts connections from the web
//! tier and the CLI. Each connection carries newline-delimited
//! [`JobRequest`]s and gets one [`JobResponse`] per request.

use std::io;
use std::path::Path;

use protocol::{JobRequest, JobResponse, LineCodec, ProtocolError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Parent directories are created and a stale socket file at the path is
    /// removed first.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self { listener })
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// A connection to an IPC client.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    codec: LineCodec,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            codec: LineCodec::new(),
        }
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected.
    pub async fn read_request(&mut self) -> Result<Option<JobRequest>, IpcError> {
        match read_line(&mut self.reader, &self.codec).await? {
            Some(line) => Ok(Some(self.codec.decode(&line)?)),
            None => Ok(None),
        }
    }

    /// Send a response to the client.
    pub async fn send_response(&mut self, response: &JobResponse) -> Result<(), IpcError> {
        let line = self.codec.encode(response)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Read one line, refusing to buffer more than the codec allows.
pub(super) async fn read_line<R>(
    reader: &mut BufReader<R>,
    codec: &LineCodec,
) -> Result<Option<Vec<u8>>, IpcError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let limit = codec.max_line_size() as u64 + 1;
    let mut line = Vec::new();
    let bytes_read = (&mut *reader)
        .take(limit)
        .read_until(protocol::LINE_DELIMITER, &mut line)
        .await?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if line.last() != Some(&protocol::LINE_DELIMITER) && bytes_read as u64 >= limit {
        return Err(IpcError::Protocol(ProtocolError::LineTooLarge {
            size: bytes_read,
            max: codec.max_line_size(),
        }));
    }

    Ok(Some(line))
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be framed or parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
