//! IPC client for talking to the job worker over its Unix socket.
//!
//! The client connects to the worker's socket and exchanges one
//! [`JobRequest`] for one [`JobResponse`] at a time.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::{Envelope, JobId, JobReport, JobRequest, JobResponse, JobStatus, LineCodec};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::server::{read_line, IpcError};

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// A client for communicating with the job worker via IPC.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    codec: LineCodec,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the worker at the specified socket path.
    ///
    /// A connection failure typically means the worker is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the worker with a custom timeout.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            codec: LineCodec::new(),
            timeout,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request to the worker and wait for its response.
    pub async fn send(&mut self, request: JobRequest) -> Result<JobResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "operation timed out"))?
    }

    async fn send_internal(&mut self, request: JobRequest) -> Result<JobResponse, IpcError> {
        let line = self.codec.encode(&request)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        match read_line(&mut self.reader, &self.codec).await? {
            Some(line) => Ok(self.codec.decode(&line)?),
            None => Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "job worker closed connection",
            ))),
        }
    }

    /// Returns `true` if the worker answers with a Pong.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(JobRequest::Ping).await?;
        Ok(matches!(response, JobResponse::Pong))
    }

    /// Current worker status.
    pub async fn status(&mut self) -> Result<JobStatus, IpcError> {
        match self.send(JobRequest::Status).await? {
            JobResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Queue `envelope` and return its job id.
    pub async fn submit(&mut self, envelope: Envelope) -> Result<JobId, IpcError> {
        match self.send(JobRequest::Submit(envelope)).await? {
            JobResponse::Accepted { job_id } => Ok(job_id),
            other => Err(unexpected(other)),
        }
    }

    /// Report of `job_id`, or `None` while it has not finished.
    pub async fn report(&mut self, job_id: JobId) -> Result<Option<JobReport>, IpcError> {
        match self.send(JobRequest::Report { job_id }).await? {
            JobResponse::Report { report } => Ok(report),
            other => Err(unexpected(other)),
        }
    }
}

/// Turn an error response (or a response of the wrong shape) into an error.
fn unexpected(response: JobResponse) -> IpcError {
    let message = match response {
        JobResponse::Error { code, message } => format!("{}: {}", code.as_str(), message),
        other => format!("unexpected response: {:?}", other),
    };
    IpcError::Io(io::Error::other(message))
}
