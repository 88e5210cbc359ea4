//! Unix Domain Socket IPC between the web tier, the CLI and the job worker.
//!
//! The worker process owns a [`JobInteractor`] and exposes it on a Unix
//! socket. Every message is one JSON value followed by a newline (see
//! [`protocol::LineCodec`]).
//!
//! ## Socket Path
//!
//! Unless configured explicitly, the socket lives at:
//! - Primary: `$XDG_RUNTIME_DIR/explorer/jobs.sock`
//! - Fallback: `/tmp/explorer-$UID/jobs.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use explorer::ipc::{get_socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!
//!     if client.ping().await? {
//!         println!("Job worker is running");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use pidfile::{is_running, pid_file_path, read_pid, PidFile};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use protocol::{Envelope, JobId, JobRequest, JobResponse};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ExplorerError, Result};
use crate::jobs::{Dispatcher, JobInteractor};

/// Default socket path for the job worker.
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("explorer").join("jobs.sock")
    } else {
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/explorer-{}", uid)).join("jobs.sock")
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/explorer-unsupported/jobs.sock")
}

/// Socket path for `config`: the configured one, else [`get_socket_path`].
pub fn socket_path(config: &Config) -> PathBuf {
    config
        .daemon
        .socket_path
        .clone()
        .unwrap_or_else(get_socket_path)
}

/// Sends commands to a job worker running in another process.
///
/// Each dispatch opens a fresh connection, so the worker may restart between
/// commands.
#[derive(Debug, Clone)]
pub struct IpcDispatcher {
    socket: PathBuf,
}

impl IpcDispatcher {
    /// Dispatch through the socket at `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// The worker socket.
    pub fn socket(&self) -> &std::path::Path {
        &self.socket
    }
}

impl Dispatcher for IpcDispatcher {
    fn dispatch<'a>(
        &'a self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<JobId>> + Send + 'a>> {
        Box::pin(async move {
            let mut client = IpcClient::connect(&self.socket).await.map_err(|e| {
                tracing::debug!(socket = %self.socket.display(), "Job worker unreachable: {}", e);
                ExplorerError::NotRunning
            })?;

            match client.send(JobRequest::Submit(envelope)).await {
                Ok(JobResponse::Accepted { job_id }) => Ok(job_id),
                Ok(JobResponse::Error { code, message }) => {
                    Err(ExplorerError::Rejected { code, message })
                }
                Ok(other) => Err(ExplorerError::Internal(format!(
                    "unexpected response to submit: {:?}",
                    other
                ))),
                Err(IpcError::Protocol(e)) => Err(e.into()),
                Err(IpcError::Io(e)) => Err(ExplorerError::Internal(format!(
                    "job worker connection failed: {}",
                    e
                ))),
            }
        })
    }
}

/// Answer one request against `interactor`.
pub fn handle_request(interactor: &JobInteractor, request: JobRequest) -> JobResponse {
    match request {
        JobRequest::Ping => JobResponse::Pong,
        JobRequest::Status => JobResponse::Status(interactor.status()),
        JobRequest::Submit(envelope) => {
            let user = envelope.user.username.clone();
            let kind = envelope.command.kind();
            match interactor.send(envelope) {
                Ok(job_id) => {
                    tracing::debug!(%job_id, %kind, %user, "Command accepted");
                    JobResponse::Accepted { job_id }
                }
                Err(e) => {
                    tracing::warn!(%kind, %user, "Command rejected: {}", e);
                    JobResponse::Error {
                        code: e.code(),
                        message: e.to_string(),
                    }
                }
            }
        }
        JobRequest::Report { job_id } => JobResponse::Report {
            report: interactor.report(job_id),
        },
    }
}

/// Serve `interactor` on `server` until `cancel` fires.
///
/// Each connection gets its own task; in-flight connections are cancelled
/// along with the accept loop.
pub async fn serve(server: IpcServer, interactor: JobInteractor, cancel: CancellationToken) {
    loop {
        let conn = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("IPC server shutting down");
                break;
            }
            accepted = server.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to accept IPC connection: {}", e);
                    continue;
                }
            },
        };

        let interactor = interactor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = handle_connection(conn, &interactor) => {}
            }
        });
    }
}

async fn handle_connection(mut conn: IpcConnection, interactor: &JobInteractor) {
    loop {
        let request = match conn.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(IpcError::Protocol(e)) => {
                tracing::debug!("Malformed IPC request: {}", e);
                // The rest of an oversized line is still unread; resync is not possible.
                let fatal = matches!(e, protocol::ProtocolError::LineTooLarge { .. });
                let response = JobResponse::Error {
                    code: protocol::ErrorCode::InvalidRequest,
                    message: e.to_string(),
                };
                if conn.send_response(&response).await.is_err() || fatal {
                    break;
                }
                continue;
            }
            Err(e) => {
                tracing::debug!("IPC connection error: {}", e);
                break;
            }
        };

        let response = handle_request(interactor, request);
        if let Err(e) = conn.send_response(&response).await {
            tracing::debug!("Failed to send IPC response: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchivePlugin;
    use crate::jobs::HandlerRegistry;
    use protocol::{ArchiveCreate, Command, Envelope, ErrorCode, JobState, UserContext};
    use serial_test::serial;
    use tempfile::tempdir;

    fn archive_envelope(root: &std::path::Path, temp: PathBuf) -> Envelope {
        Envelope::new(
            UserContext::new("alice", root),
            Command::ArchiveCreate(ArchiveCreate {
                name: "bundle".to_string(),
                paths: vec![root.join("a.txt")],
                directories: Vec::new(),
                temp,
                root: root.to_path_buf(),
            }),
        )
    }

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let path = get_socket_path();
        assert_eq!(path, PathBuf::from("/run/user/1000/explorer/jobs.sock"));

        match original {
            Some(val) => std::env::set_var("XDG_RUNTIME_DIR", val),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::remove_var("XDG_RUNTIME_DIR");
        let path = get_socket_path();
        assert!(path.to_str().unwrap().starts_with("/tmp/explorer-"));
        assert!(path.to_str().unwrap().ends_with("/jobs.sock"));

        if let Some(val) = original {
            std::env::set_var("XDG_RUNTIME_DIR", val);
        }
    }

    #[test]
    fn test_socket_path_prefers_config() {
        let mut config = Config::default();
        config.daemon.socket_path = Some(PathBuf::from("/srv/explorer/jobs.sock"));
        assert_eq!(socket_path(&config), PathBuf::from("/srv/explorer/jobs.sock"));
    }

    #[tokio::test]
    async fn test_handle_request_before_launch() {
        let interactor = JobInteractor::default();
        let temp_dir = tempdir().unwrap();

        assert_eq!(handle_request(&interactor, JobRequest::Ping), JobResponse::Pong);

        match handle_request(&interactor, JobRequest::Status) {
            JobResponse::Status(status) => assert_eq!(status.state, JobState::Unstarted),
            other => panic!("unexpected response: {:?}", other),
        }

        let envelope = archive_envelope(temp_dir.path(), temp_dir.path().join("out.zip"));
        match handle_request(&interactor, JobRequest::Submit(envelope)) {
            JobResponse::Error { code, .. } => assert_eq!(code, ErrorCode::NotRunning),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_serve_submit_and_report() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().join("home");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.txt"), "hello").unwrap();
        let root = root.canonicalize().unwrap();
        let output = temp_dir.path().join("bundle.zip");

        let interactor = JobInteractor::default();
        interactor
            .launch(
                HandlerRegistry::new().with(ArchivePlugin::new().with_output_dir(temp_dir.path())),
            )
            .unwrap();
        let mut reports = interactor.subscribe();

        let socket = temp_dir.path().join("jobs.sock");
        let server = IpcServer::bind(&socket).await.unwrap();
        let cancel = CancellationToken::new();
        let serve_handle = tokio::spawn(serve(server, interactor.clone(), cancel.clone()));

        let mut client = IpcClient::connect(&socket).await.unwrap();
        assert!(client.ping().await.unwrap());

        let job_id = client
            .submit(archive_envelope(&root, output.clone()))
            .await
            .unwrap();

        let finished = reports.recv().await.unwrap();
        assert_eq!(finished.job_id, job_id);

        let report = client.report(job_id).await.unwrap().unwrap();
        assert!(report.is_success(), "report: {:?}", report);
        assert!(output.exists());

        cancel.cancel();
        serve_handle.await.unwrap();
        interactor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ipc_dispatcher_without_worker() {
        let temp_dir = tempdir().unwrap();
        let dispatcher = IpcDispatcher::new(temp_dir.path().join("missing.sock"));
        let envelope = archive_envelope(temp_dir.path(), temp_dir.path().join("out.zip"));

        let err = dispatcher.dispatch(envelope).await.unwrap_err();
        assert!(matches!(err, ExplorerError::NotRunning));
    }

    #[tokio::test]
    async fn test_ipc_dispatcher_surfaces_rejection() {
        let temp_dir = tempdir().unwrap();
        let socket = temp_dir.path().join("jobs.sock");
        let server = IpcServer::bind(&socket).await.unwrap();
        let cancel = CancellationToken::new();
        // Never launched, so every submit is refused.
        let serve_handle = tokio::spawn(serve(server, JobInteractor::default(), cancel.clone()));

        let dispatcher = IpcDispatcher::new(&socket);
        let envelope = archive_envelope(temp_dir.path(), temp_dir.path().join("out.zip"));
        let err = dispatcher.dispatch(envelope).await.unwrap_err();
        match err {
            ExplorerError::Rejected { code, .. } => assert_eq!(code, ErrorCode::NotRunning),
            other => panic!("unexpected error: {:?}", other),
        }

        cancel.cancel();
        serve_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_answers_malformed_request() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let temp_dir = tempdir().unwrap();
        let socket = temp_dir.path().join("jobs.sock");
        let server = IpcServer::bind(&socket).await.unwrap();
        let cancel = CancellationToken::new();
        let serve_handle = tokio::spawn(serve(server, JobInteractor::default(), cancel.clone()));

        let stream = tokio::net::UnixStream::connect(&socket).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_half.write_all(b"{not json}\n").await.unwrap();
        write_half.flush().await.unwrap();

        let mut line = String::new();
        BufReader::new(read_half).read_line(&mut line).await.unwrap();
        let response: JobResponse = serde_json::from_str(line.trim()).unwrap();
        assert!(matches!(
            response,
            JobResponse::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));

        cancel.cancel();
        serve_handle.await.unwrap();
    }
}
