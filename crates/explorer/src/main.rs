//! Explorer
//!
//! Job worker service and command-line front end for confined file browsing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use explorer::archive::ArchivePlugin;
use explorer::config::Config;
use explorer::ipc::{self, IpcClient, IpcDispatcher, IpcServer, PidFile};
use explorer::jobs::{HandlerRegistry, JobInteractor};
use explorer::protocol::{JobId, JobOutcome, JobReport, UserContext};
use explorer::{
    Action, ActionOutcome, ActionRequest, Explorer, Removal, Root, TreeListing, TreeQuery,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Explorer - confined file browsing and background archiving.
#[derive(Parser, Debug)]
#[command(name = "explorer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the job worker until interrupted
    Start,

    /// Show job worker status
    Status,

    /// List a directory or search results
    Tree {
        /// Directory relative to the root
        path: Option<String>,

        #[command(flatten)]
        root: RootArgs,

        /// Sort key (name, size, date, type)
        #[arg(long)]
        sort: Option<String>,

        /// Sort order (asc, desc)
        #[arg(long)]
        order: Option<String>,

        /// Page number, starting at 1
        #[arg(long, short)]
        page: Option<String>,

        /// Search below the root instead of listing
        #[arg(long, short)]
        search: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Write a zip of the selection to a file or stdout
    Zip {
        /// Files to include, relative to the root
        paths: Vec<PathBuf>,

        #[command(flatten)]
        root: RootArgs,

        /// Directory to include recursively (repeatable)
        #[arg(long = "dir", short = 'd', value_name = "DIR")]
        directories: Vec<PathBuf>,

        /// Archive name
        #[arg(long, short)]
        name: Option<String>,

        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Queue a background archive on the job worker
    Archive {
        /// Files to include, relative to the root
        paths: Vec<PathBuf>,

        #[command(flatten)]
        root: RootArgs,

        /// Directory to include recursively (repeatable)
        #[arg(long = "dir", short = 'd', value_name = "DIR")]
        directories: Vec<PathBuf>,

        /// Archive name
        #[arg(long, short)]
        name: Option<String>,

        /// Wait for the job report
        #[arg(long, short)]
        wait: bool,
    },

    /// Show the report of a background job
    Report {
        /// Job id printed by `archive`
        job_id: JobId,

        /// Wait until the job has finished
        #[arg(long, short)]
        wait: bool,
    },

    /// Delete files according to the configured remove method
    Remove {
        /// Paths to remove, relative to the root
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        root: RootArgs,
    },

    /// Permanently clear the trash directory
    EmptyTrash {
        #[command(flatten)]
        root: RootArgs,
    },
}

/// Confinement root shared by the file commands.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct RootArgs {
    /// Confinement root (defaults to the home directory)
    #[arg(long, short, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

/// Output format for listings.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned columns
    Table,
    /// JSON document
    Json,
}

/// Interval between report polls.
const REPORT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing; stdout is reserved for command output
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Start => run_worker(config).await,
        Commands::Status => {
            let socket = ipc::socket_path(&config);
            let mut client = connect(&socket).await?;
            let status = client
                .status()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to query status: {}", e))?;

            println!("Job worker: {:?}", status.state);
            println!("  Socket:    {}", socket.display());
            println!("  Processed: {}", status.processed);
            println!("  Failed:    {}", status.failed);
            println!("  Queued:    {}", status.queued);
            Ok(())
        }
        Commands::Tree {
            path,
            root,
            sort,
            order,
            page,
            search,
            format,
        } => {
            let root = resolve_root(&config, &root)?;
            let explorer = Explorer::new(config);
            let query = TreeQuery {
                path,
                sort,
                order,
                page,
                search,
            };
            let listing = explorer.tree(&root, &query).await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listing)?),
                OutputFormat::Table => print_listing(&listing),
            }
            Ok(())
        }
        Commands::Zip {
            paths,
            root,
            directories,
            name,
            output,
        } => {
            let root = resolve_root(&config, &root)?;
            let user = local_user(&root);
            let explorer = Explorer::new(config);
            let request = selection(Action::Download, paths, directories, name);

            let outcome = match &output {
                Some(output) => {
                    let mut file = tokio::fs::File::create(output)
                        .await
                        .with_context(|| format!("Failed to create {}", output.display()))?;
                    let result = explorer
                        .perform(&user, &root, request, Some(&mut file))
                        .await;
                    if result.is_err() {
                        // Streaming may have written part of the archive.
                        let _ = tokio::fs::remove_file(output).await;
                    }
                    result?
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    explorer
                        .perform(&user, &root, request, Some(&mut stdout))
                        .await?
                }
            };

            if let ActionOutcome::Streamed(summary) = outcome {
                tracing::info!(
                    entries = summary.entries,
                    bytes = summary.bytes,
                    "Archive written"
                );
            }
            Ok(())
        }
        Commands::Archive {
            paths,
            root,
            directories,
            name,
            wait,
        } => {
            let root = resolve_root(&config, &root)?;
            let user = local_user(&root);
            let socket = ipc::socket_path(&config);
            let explorer =
                Explorer::new(config).with_dispatcher(Arc::new(IpcDispatcher::new(&socket)));
            let request = selection(Action::Archive, paths, directories, name);

            match explorer.perform(&user, &root, request, None).await? {
                ActionOutcome::Accepted {
                    job_id,
                    destination,
                } => {
                    println!("Queued job {}", job_id);
                    println!("  Destination: {}", destination.display());
                    if wait {
                        let report = wait_for_report(&socket, job_id).await?;
                        print_report(&report);
                    }
                }
                other => anyhow::bail!("Unexpected outcome: {:?}", other),
            }
            Ok(())
        }
        Commands::Report { job_id, wait } => {
            let socket = ipc::socket_path(&config);
            if wait {
                let report = wait_for_report(&socket, job_id).await?;
                print_report(&report);
            } else {
                let mut client = connect(&socket).await?;
                match client
                    .report(job_id)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to query report: {}", e))?
                {
                    Some(report) => print_report(&report),
                    None => println!("Job {} has not finished (or is unknown)", job_id),
                }
            }
            Ok(())
        }
        Commands::Remove { paths, root } => {
            let root = resolve_root(&config, &root)?;
            let user = local_user(&root);
            let explorer = Explorer::new(config);
            let request = ActionRequest::new(Action::Remove, paths);

            if let ActionOutcome::Removed { removals } =
                explorer.perform(&user, &root, request, None).await?
            {
                for removal in removals {
                    match removal {
                        Removal::Trashed { from, to } => {
                            println!("Trashed {} -> {}", from.display(), to.display())
                        }
                        Removal::Deleted { path } => {
                            println!("Deleted {}", path.display())
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::EmptyTrash { root } => {
            let root = resolve_root(&config, &root)?;
            config
                .check_root(root.as_path())
                .context("Refusing to empty the trash")?;
            let user = local_user(&root);
            let explorer = Explorer::new(config);
            let removed = explorer.empty_trash(&user, &root).await?;
            println!("Removed {} entries from the trash", removed);
            Ok(())
        }
    }
}

/// Run the job worker until SIGTERM or SIGINT.
async fn run_worker(config: Config) -> anyhow::Result<()> {
    let pid_path = ipc::pid_file_path(&config.daemon.data_dir);

    // Check for an existing worker BEFORE binding the socket
    if let Some(pid) = ipc::read_pid(&pid_path) {
        eprintln!("Error: Job worker already running (PID: {})", pid);
        eprintln!();
        eprintln!("To check its status, run:");
        eprintln!("  explorer status");
        std::process::exit(1);
    }

    let _pid_file = PidFile::acquire(&pid_path)
        .with_context(|| format!("Failed to write PID file {}", pid_path.display()))?;

    let socket = ipc::socket_path(&config);
    let server = IpcServer::bind(&socket)
        .await
        .with_context(|| format!("Failed to bind {}", socket.display()))?;

    let interactor = JobInteractor::new(config.jobs.mailbox_capacity, config.jobs.report_history);
    let registry =
        HandlerRegistry::new().with(ArchivePlugin::new().with_output_dir(&config.archive.path));
    interactor.launch(registry)?;

    tracing::info!(
        socket = %socket.display(),
        pid = std::process::id(),
        "Job worker listening"
    );

    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(ipc::serve(server, interactor.clone(), cancel.clone()));

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    cancel.cancel();
    if let Err(e) = server_task.await {
        tracing::warn!("IPC server task failed: {}", e);
    }

    // Queued commands are drained before the worker stops
    interactor.shutdown().await?;

    if let Err(e) = std::fs::remove_file(&socket) {
        tracing::debug!("Failed to remove socket {:?}: {}", socket, e);
    }

    tracing::info!("Job worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Connect to the job worker with a timeout.
async fn connect(socket: &Path) -> anyhow::Result<IpcClient> {
    IpcClient::connect_with_timeout(socket, Duration::from_secs(5))
        .await
        .map_err(|e| anyhow::anyhow!("Job worker is not running: {}", e))
}

/// Poll the worker until `job_id` has a report.
async fn wait_for_report(socket: &Path, job_id: JobId) -> anyhow::Result<JobReport> {
    let mut client = connect(socket).await?;
    loop {
        let report = client
            .report(job_id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query report: {}", e))?;
        if let Some(report) = report {
            return Ok(report);
        }
        tokio::time::sleep(REPORT_POLL_INTERVAL).await;
    }
}

/// The `--root` argument, else the home directory.
fn resolve_root(config: &Config, args: &RootArgs) -> anyhow::Result<Root> {
    let path = match &args.root {
        Some(root) => root.clone(),
        None => dirs::home_dir().context("No home directory; pass --root")?,
    };
    let root = Root::new(&path).with_context(|| format!("Invalid root {}", path.display()))?;
    config.check_root(root.as_path())?;
    Ok(root)
}

/// The invoking user, homed at `root`.
fn local_user(root: &Root) -> UserContext {
    let username = std::env::var("USER").unwrap_or_else(|_| "explorer".to_string());
    UserContext::new(username, root.as_path())
}

fn selection(
    action: Action,
    paths: Vec<PathBuf>,
    directories: Vec<PathBuf>,
    name: Option<String>,
) -> ActionRequest {
    let mut request = ActionRequest::new(action, paths).directories(directories);
    request.name = name;
    request
}

fn print_listing(listing: &TreeListing) {
    match &listing.search {
        Some(search) => println!("Search results for {:?}:", search),
        None => println!("/{}", listing.path.display()),
    }

    if listing.entries.is_empty() {
        println!("  (empty)");
    } else {
        println!("{:<10} {:>12} {:<20} NAME", "TYPE", "SIZE", "MODIFIED");
        println!("{}", "-".repeat(60));
        for entry in &listing.entries {
            let name = if listing.search.is_some() {
                entry.relative.display().to_string()
            } else if entry.is_directory {
                format!("{}/", entry.name)
            } else {
                entry.name.clone()
            };
            println!(
                "{:<10} {:>12} {:<20} {}",
                format!("{:?}", entry.file_type).to_lowercase(),
                entry.size,
                entry.modified.format("%Y-%m-%d %H:%M"),
                name
            );
        }
    }

    println!();
    println!(
        "Page {} of {} ({} entries)",
        listing.page, listing.pages, listing.total
    );
}

fn print_report(report: &JobReport) {
    println!("Job {} ({})", report.job_id, report.kind);
    println!("  User:     {}", report.user);
    match &report.outcome {
        JobOutcome::Completed { artifact } => {
            println!("  Status:   completed");
            if let Some(artifact) = artifact {
                println!("  Artifact: {}", artifact.display());
            }
        }
        JobOutcome::Failed { code, message } => {
            println!("  Status:   failed ({})", code.as_str());
            println!("  Error:    {}", message);
        }
    }
}
