//! The job interactor: one supervised worker with a bounded mailbox.
//!
//! The worker is launched at most once per interactor. Commands are accepted
//! with a [`JobId`] and run one at a time in arrival order. A failing (or
//! panicking) command produces a failed [`JobReport`] and the worker moves on
//! to the next one; nothing propagates to the submitter.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::{CommandKind, Envelope, JobId, JobOutcome, JobReport, JobState, JobStatus};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler::HandlerRegistry;
use crate::error::{ExplorerError, Result};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default number of finished reports kept.
pub const DEFAULT_REPORT_HISTORY: usize = 256;

/// Capacity of the report broadcast channel.
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// A queued command.
struct Job {
    id: JobId,
    envelope: Envelope,
}

/// State guarded by the control lock.
struct Control {
    state: JobState,
    sender: Option<mpsc::Sender<Job>>,
    kinds: HashSet<CommandKind>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    control: Mutex<Control>,
    reports: Mutex<VecDeque<JobReport>>,
    report_tx: broadcast::Sender<JobReport>,
    processed: AtomicU64,
    failed: AtomicU64,
    capacity: usize,
    history: usize,
}

impl Shared {
    fn control(&self) -> Result<MutexGuard<'_, Control>> {
        self.control
            .lock()
            .map_err(|_| ExplorerError::Internal("job control lock poisoned".to_string()))
    }

    fn record(&self, report: JobReport) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !report.is_success() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut reports) = self.reports.lock() {
            if reports.len() >= self.history {
                reports.pop_front();
            }
            reports.push_back(report.clone());
        }

        // No subscribers is fine.
        let _ = self.report_tx.send(report);
    }
}

/// Owns the single job worker.
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct JobInteractor {
    shared: Arc<Shared>,
}

impl Default for JobInteractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY, DEFAULT_REPORT_HISTORY)
    }
}

impl JobInteractor {
    /// Create an interactor whose mailbox holds `capacity` commands and
    /// which keeps the last `history` reports.
    pub fn new(capacity: usize, history: usize) -> Self {
        let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: JobState::Unstarted,
                    sender: None,
                    kinds: HashSet::new(),
                    worker: None,
                }),
                reports: Mutex::new(VecDeque::new()),
                report_tx,
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                capacity: capacity.max(1),
                history: history.max(1),
            }),
        }
    }

    /// Start the worker with `registry`'s handlers.
    ///
    /// Fails with `AlreadyRunning` while a worker is alive and with
    /// `WorkerExited` once it has stopped; in both cases nothing is spawned.
    /// Must be called from within a Tokio runtime.
    pub fn launch(&self, registry: HandlerRegistry) -> Result<()> {
        let mut control = self.shared.control()?;
        match control.state {
            JobState::Running => return Err(ExplorerError::AlreadyRunning),
            JobState::Exited => return Err(ExplorerError::WorkerExited),
            JobState::Unstarted => {}
        }

        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let kinds: HashSet<CommandKind> = registry.kinds().into_iter().collect();
        info!(handlers = ?kinds, capacity = self.shared.capacity, "Launching job worker");

        let shared = Arc::clone(&self.shared);
        control.worker = Some(tokio::spawn(run_worker(shared, rx, registry)));
        control.sender = Some(tx);
        control.kinds = kinds;
        control.state = JobState::Running;
        Ok(())
    }

    /// Queue `envelope` for the worker. Returns as soon as it is queued.
    pub fn send(&self, envelope: Envelope) -> Result<JobId> {
        envelope.check_version()?;
        let kind = envelope.command.kind();

        let control = self.shared.control()?;
        let sender = match (control.state, control.sender.as_ref()) {
            (JobState::Running, Some(sender)) => sender,
            (JobState::Unstarted, _) => return Err(ExplorerError::NotRunning),
            _ => return Err(ExplorerError::WorkerExited),
        };

        if !control.kinds.contains(&kind) {
            return Err(ExplorerError::UnknownCommand(kind));
        }

        let id = JobId::new();
        let user = envelope.user.username.clone();
        match sender.try_send(Job { id, envelope }) {
            Ok(()) => {
                debug!(job_id = %id, %kind, %user, "Command queued");
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%kind, "Job mailbox is full");
                Err(ExplorerError::MailboxFull(self.shared.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ExplorerError::WorkerExited),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.shared
            .control()
            .map(|c| c.state)
            .unwrap_or(JobState::Exited)
    }

    /// Snapshot of state and counters.
    pub fn status(&self) -> JobStatus {
        let (state, queued) = match self.shared.control() {
            Ok(control) => {
                let queued = control
                    .sender
                    .as_ref()
                    .map(|s| s.max_capacity() - s.capacity())
                    .unwrap_or(0);
                (control.state, queued)
            }
            Err(_) => (JobState::Exited, 0),
        };

        JobStatus {
            state,
            processed: self.shared.processed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            queued,
        }
    }

    /// Report of a finished command, if it is still in the history.
    pub fn report(&self, job_id: JobId) -> Option<JobReport> {
        let reports = self.shared.reports.lock().ok()?;
        reports.iter().rev().find(|r| r.job_id == job_id).cloned()
    }

    /// Receive every report produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobReport> {
        self.shared.report_tx.subscribe()
    }

    /// Close the mailbox and wait for the worker to finish what is queued.
    ///
    /// The interactor ends in `Exited` and cannot be relaunched. Calling this
    /// before launch marks it `Exited` too.
    pub async fn shutdown(&self) -> Result<()> {
        let worker = {
            let mut control = self.shared.control()?;
            control.sender = None;
            if control.state == JobState::Unstarted {
                control.state = JobState::Exited;
            }
            control.worker.take()
        };

        if let Some(worker) = worker {
            info!("Waiting for job worker to drain");
            worker.await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for JobInteractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInteractor")
            .field("status", &self.status())
            .finish()
    }
}

async fn run_worker(shared: Arc<Shared>, mut rx: mpsc::Receiver<Job>, registry: HandlerRegistry) {
    info!("Job worker started");

    while let Some(job) = rx.recv().await {
        let report = execute(&registry, job).await;
        shared.record(report);
    }

    if let Ok(mut control) = shared.control() {
        control.state = JobState::Exited;
        control.sender = None;
    }
    info!("Job worker exited");
}

async fn execute(registry: &HandlerRegistry, job: Job) -> JobReport {
    let Job { id, envelope } = job;
    let kind = envelope.command.kind();
    let user = envelope.user.username.clone();

    info!(job_id = %id, %kind, %user, "Running command");

    let result = match registry.get(kind) {
        Some(handler) => {
            // A separate task turns a handler panic into a failed report.
            tokio::spawn(async move { handler.handle(&envelope).await })
                .await
                .unwrap_or_else(|e| Err(e.into()))
        }
        None => Err(ExplorerError::UnknownCommand(kind)),
    };

    let outcome = match result {
        Ok(artifact) => {
            info!(
                job_id = %id,
                %kind,
                artifact = ?artifact,
                "Command completed"
            );
            JobOutcome::Completed { artifact }
        }
        Err(e) => {
            error!(job_id = %id, %kind, "Command failed: {}", e);
            JobOutcome::Failed {
                code: e.code(),
                message: e.to_string(),
            }
        }
    };

    JobReport {
        job_id: id,
        kind,
        user,
        outcome,
        finished_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::CommandHandler;
    use protocol::{ArchiveCreate, Command, ErrorCode, UserContext};
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records the archive names it sees; fails on "fail", panics on "panic",
    /// and waits for `gate` on "block".
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        gate: Arc<Notify>,
    }

    impl CommandHandler for Recorder {
        fn kind(&self) -> CommandKind {
            CommandKind::ArchiveCreate
        }

        fn handle<'a>(
            &'a self,
            envelope: &'a Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<Option<PathBuf>>> + Send + 'a>> {
            Box::pin(async move {
                let Command::ArchiveCreate(command) = &envelope.command;
                match command.name.as_str() {
                    "block" => self.gate.notified().await,
                    "fail" => return Err(ExplorerError::Forbidden("nope".to_string())),
                    "panic" => panic!("handler blew up"),
                    _ => {}
                }
                self.seen.lock().unwrap().push(command.name.clone());
                Ok(Some(command.temp.clone()))
            })
        }
    }

    fn recorder() -> (HandlerRegistry, Arc<Mutex<Vec<String>>>, Arc<Notify>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        let registry = HandlerRegistry::new().with(Recorder {
            seen: Arc::clone(&seen),
            gate: Arc::clone(&gate),
        });
        (registry, seen, gate)
    }

    fn envelope(name: &str) -> Envelope {
        Envelope::new(
            UserContext::new("alice", "/home/alice"),
            Command::ArchiveCreate(ArchiveCreate {
                name: name.to_string(),
                paths: Vec::new(),
                directories: Vec::new(),
                temp: PathBuf::from(format!("/tmp/{}.zip", name)),
                root: PathBuf::from("/home/alice"),
            }),
        )
    }

    async fn wait_for_report(
        rx: &mut broadcast::Receiver<JobReport>,
        job_id: JobId,
    ) -> JobReport {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let report = rx.recv().await.unwrap();
                if report.job_id == job_id {
                    return report;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_launch_twice_is_rejected() {
        let interactor = JobInteractor::default();
        let (registry, seen, _gate) = recorder();
        let (second, _, _) = recorder();

        interactor.launch(registry).unwrap();
        let result = interactor.launch(second);
        assert!(matches!(result, Err(ExplorerError::AlreadyRunning)));
        assert_eq!(interactor.state(), JobState::Running);

        let mut rx = interactor.subscribe();
        let id = interactor.send(envelope("one")).unwrap();
        wait_for_report(&mut rx, id).await;
        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string()]);
        assert_eq!(interactor.status().processed, 1);
    }

    #[tokio::test]
    async fn test_send_before_launch() {
        let interactor = JobInteractor::default();
        let result = interactor.send(envelope("early"));
        assert!(matches!(result, Err(ExplorerError::NotRunning)));
        assert_eq!(interactor.status().state, JobState::Unstarted);
    }

    #[tokio::test]
    async fn test_unknown_command_rejected_at_submit() {
        let interactor = JobInteractor::default();
        interactor.launch(HandlerRegistry::new()).unwrap();

        let result = interactor.send(envelope("x"));
        assert!(matches!(
            result,
            Err(ExplorerError::UnknownCommand(CommandKind::ArchiveCreate))
        ));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let interactor = JobInteractor::default();
        let (registry, _, _) = recorder();
        interactor.launch(registry).unwrap();

        let mut stale = envelope("old");
        stale.version = 0;
        let result = interactor.send(stale);
        assert!(matches!(result, Err(ExplorerError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let interactor = JobInteractor::default();
        let (registry, seen, _gate) = recorder();
        interactor.launch(registry).unwrap();

        let mut rx = interactor.subscribe();
        let mut last = None;
        for name in ["a", "b", "c", "d"] {
            last = Some(interactor.send(envelope(name)).unwrap());
        }
        wait_for_report(&mut rx, last.unwrap()).await;

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let interactor = JobInteractor::default();
        let (registry, seen, _gate) = recorder();
        interactor.launch(registry).unwrap();

        let mut rx = interactor.subscribe();
        let failed = interactor.send(envelope("fail")).unwrap();
        let panicked = interactor.send(envelope("panic")).unwrap();
        let ok = interactor.send(envelope("after")).unwrap();

        let report = wait_for_report(&mut rx, failed).await;
        assert_eq!(
            report.outcome,
            JobOutcome::Failed {
                code: ErrorCode::Forbidden,
                message: "forbidden: nope".to_string()
            }
        );

        let report = wait_for_report(&mut rx, panicked).await;
        assert!(matches!(
            report.outcome,
            JobOutcome::Failed {
                code: ErrorCode::Internal,
                ..
            }
        ));

        let report = wait_for_report(&mut rx, ok).await;
        assert!(report.is_success());
        assert_eq!(*seen.lock().unwrap(), vec!["after"]);

        let status = interactor.status();
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.processed, 3);
        assert_eq!(status.failed, 2);

        assert_eq!(interactor.report(failed).unwrap().job_id, failed);
        assert_eq!(
            interactor.report(ok).unwrap().outcome,
            JobOutcome::Completed {
                artifact: Some(PathBuf::from("/tmp/after.zip"))
            }
        );
        assert!(interactor.report(JobId::new()).is_none());
    }

    #[tokio::test]
    async fn test_mailbox_full() {
        let interactor = JobInteractor::new(1, 8);
        let (registry, _seen, gate) = recorder();
        interactor.launch(registry).unwrap();

        let mut rx = interactor.subscribe();
        let blocking = interactor.send(envelope("block")).unwrap();

        // Wait until the worker has taken the blocking job off the queue.
        tokio::time::timeout(Duration::from_secs(5), async {
            while interactor.status().queued > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        interactor.send(envelope("queued")).unwrap();
        let result = interactor.send(envelope("overflow"));
        assert!(matches!(result, Err(ExplorerError::MailboxFull(1))));
        assert_eq!(interactor.status().queued, 1);

        gate.notify_one();
        wait_for_report(&mut rx, blocking).await;
    }

    #[tokio::test]
    async fn test_report_history_is_bounded() {
        let interactor = JobInteractor::new(8, 2);
        let (registry, _seen, _gate) = recorder();
        interactor.launch(registry).unwrap();

        let mut rx = interactor.subscribe();
        let ids: Vec<JobId> = ["a", "b", "c"]
            .iter()
            .map(|name| interactor.send(envelope(name)).unwrap())
            .collect();
        wait_for_report(&mut rx, ids[2]).await;

        assert!(interactor.report(ids[0]).is_none());
        assert!(interactor.report(ids[1]).is_some());
        assert!(interactor.report(ids[2]).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_exits() {
        let interactor = JobInteractor::default();
        let (registry, seen, _gate) = recorder();
        interactor.launch(registry).unwrap();

        interactor.send(envelope("x")).unwrap();
        interactor.send(envelope("y")).unwrap();
        interactor.shutdown().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["x", "y"]);
        assert_eq!(interactor.state(), JobState::Exited);

        let (registry, _, _) = recorder();
        assert!(matches!(
            interactor.launch(registry),
            Err(ExplorerError::WorkerExited)
        ));
        assert!(matches!(
            interactor.send(envelope("z")),
            Err(ExplorerError::WorkerExited)
        ));
    }
}
