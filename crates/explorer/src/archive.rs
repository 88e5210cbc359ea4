//! Zip archive creation.
//!
//! Archives are built in two modes:
//! - **Stream**: for direct downloads. The zip writer runs on a blocking
//!   thread and writes into a small in-memory pipe that is drained into the
//!   async sink. When the sink stops accepting bytes the pipe fills up and
//!   the writer blocks. A failure on either side ends the stream with an
//!   error; bytes already sent are not taken back.
//! - **File**: for background jobs. The zip is written to a temporary file
//!   next to the destination and renamed into place when complete. The
//!   destination must lie inside the configured archive directory.
//!
//! Source files are stored under their base name. Directories are walked
//! recursively and their entries keep the path below the directory's parent,
//! so archiving `docs/` yields `docs/...` entries.

use std::collections::HashSet;
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::{ArchiveCreate, Command, CommandKind, CommandOptions, Compression, Envelope};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::SyncIoBridge;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{ExplorerError, Result};
use crate::files::guard::{normalize, GuardedPath, Root};
use crate::jobs::handler::CommandHandler;

/// Archive extension.
const ZIP_EXTENSION: &str = "zip";

/// Bytes buffered between the zip writer and a streaming sink.
const STREAM_BUFFER: usize = 64 * 1024;

/// Reduce a user-supplied archive name to a bare file stem.
///
/// Directory components and a trailing `.zip` are dropped. Empty or missing
/// names become `archive<unix-millis>`.
pub fn archive_name(raw: Option<&str>) -> String {
    let base = raw
        .map(str::trim)
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let stem = match base.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(ZIP_EXTENSION) => stem.to_string(),
        _ => base,
    };

    if stem.is_empty() || stem.starts_with('.') {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("archive{}", millis)
    } else {
        stem
    }
}

/// A validated archive request.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    name: String,
    root: Root,
    files: Vec<GuardedPath>,
    directories: Vec<GuardedPath>,
}

impl ArchiveRequest {
    /// Validate sources against `root`. Touches the filesystem.
    ///
    /// Every source must confine to a descendant of the root and must not
    /// resolve outside it (`Unauthorized`). Directories are accepted in
    /// `paths` only when they are also listed in `directories`; otherwise
    /// they fail with `IsADirectory`. Entries of `directories` must be
    /// directories (`NotADirectory`).
    pub fn new(root: Root, name: &str, paths: &[PathBuf], directories: &[PathBuf]) -> Result<Self> {
        let mut dirs = Vec::with_capacity(directories.len());
        for directory in directories {
            let guarded = confine_source(&root, directory)?;
            let metadata = fs::metadata(&guarded).map_err(|e| ExplorerError::fs(&guarded, e))?;
            if !metadata.is_dir() {
                return Err(ExplorerError::NotADirectory(guarded.into_path_buf()));
            }
            if !dirs.contains(&guarded) {
                dirs.push(guarded);
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let guarded = confine_source(&root, path)?;
            let metadata = fs::metadata(&guarded).map_err(|e| ExplorerError::fs(&guarded, e))?;
            if metadata.is_dir() {
                if dirs.contains(&guarded) {
                    continue;
                }
                return Err(ExplorerError::IsADirectory(guarded.into_path_buf()));
            }
            files.push(guarded);
        }

        Ok(Self {
            name: archive_name(Some(name)),
            root,
            files,
            directories: dirs,
        })
    }

    /// Validate an `archive.create` payload.
    pub fn from_command(command: &ArchiveCreate) -> Result<Self> {
        let root = Root::new(&command.root)?;
        Self::new(root, &command.name, &command.paths, &command.directories)
    }

    /// Archive stem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<name>.zip`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, ZIP_EXTENSION)
    }

    /// Validated files.
    pub fn files(&self) -> &[GuardedPath] {
        &self.files
    }

    /// Validated directories.
    pub fn directories(&self) -> &[GuardedPath] {
        &self.directories
    }

    /// Resolve the full list of zip entries.
    fn plan(&self) -> Result<Vec<Entry>> {
        let mut names = UniqueNames::default();
        let mut entries = Vec::new();

        for file in &self.files {
            let base = file.file_name().unwrap_or_else(|| self.name.clone());
            entries.push(Entry::File {
                name: names.claim(&base),
                source: file.as_path().to_path_buf(),
            });
        }

        for directory in &self.directories {
            let base = directory.as_path().parent().unwrap_or(self.root.as_path());
            for item in WalkDir::new(directory).follow_links(false).sort_by_file_name() {
                let item = item.map_err(|e| {
                    let path = e.path().unwrap_or(directory.as_path()).to_path_buf();
                    ExplorerError::fs(&path, io::Error::other(e.to_string()))
                })?;

                let Some(relative) = entry_name(item.path(), base) else {
                    continue;
                };

                let file_type = item.file_type();
                if file_type.is_dir() {
                    entries.push(Entry::Directory {
                        name: names.claim(&format!("{}/", relative)),
                    });
                } else if file_type.is_file() {
                    entries.push(Entry::File {
                        name: names.claim(&relative),
                        source: item.into_path(),
                    });
                } else if file_type.is_symlink() {
                    // Linked files are included only when they stay inside
                    // the root; linked directories are not followed.
                    let link = self.root.confine(item.path());
                    match link.resolve(&self.root) {
                        Ok(target) if target.as_path().is_file() => entries.push(Entry::File {
                            name: names.claim(&relative),
                            source: target.into_path_buf(),
                        }),
                        _ => tracing::debug!(
                            path = %item.path().display(),
                            "Skipping symlink in archive"
                        ),
                    }
                }
            }
        }

        Ok(entries)
    }
}

fn confine_source(root: &Root, path: &Path) -> Result<GuardedPath> {
    let guarded = root.confine(path);
    if guarded.is_root() {
        return Err(ExplorerError::Unauthorized(format!(
            "{} is not inside {}",
            path.display(),
            root.as_path().display()
        )));
    }
    // Symlinks must not lead out; the lexical path is kept for naming.
    guarded.resolve(root)?;
    Ok(guarded)
}

/// `path` below `base`, `/`-separated.
fn entry_name(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    File { name: String, source: PathBuf },
    Directory { name: String },
}

/// Hands out entry names, suffixing duplicates as `name (1).ext`.
#[derive(Debug, Default)]
struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }

        let (dir, file) = match name.trim_end_matches('/').rsplit_once('/') {
            Some((dir, file)) => (format!("{}/", dir), file.to_string()),
            None => (String::new(), name.trim_end_matches('/').to_string()),
        };
        let trailing = if name.ends_with('/') { "/" } else { "" };
        let (stem, ext) = match file.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (file.clone(), String::new()),
        };

        let mut n = 1;
        loop {
            let candidate = format!("{}{} ({}){}{}", dir, stem, n, ext, trailing);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Where the archive goes.
pub enum ArchiveOutput<'a> {
    /// A live response body.
    Stream(&'a mut (dyn AsyncWrite + Unpin + Send)),
    /// A file on disk; replaced atomically.
    File(PathBuf),
}

/// Result of a finished archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    /// File entries written.
    pub entries: usize,
    /// Size of the zip in bytes.
    pub bytes: u64,
    /// Destination file, for [`ArchiveOutput::File`].
    pub destination: Option<PathBuf>,
}

/// Handler for `archive.create` and builder for inline downloads.
///
/// Background archives are only written below the output directory; a
/// plugin without one refuses `archive.create`.
#[derive(Debug, Clone, Default)]
pub struct ArchivePlugin {
    output_dir: Option<PathBuf>,
}

impl ArchivePlugin {
    /// Create the plugin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept background archives written below `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Directory background archives are confined to.
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Build the archive described by `request` into `output`.
    pub async fn create(
        &self,
        request: ArchiveRequest,
        options: CommandOptions,
        output: ArchiveOutput<'_>,
    ) -> Result<ArchiveSummary> {
        let name = request.file_name();
        let summary = match output {
            ArchiveOutput::Stream(sink) => stream_zip(request, options, sink).await?,
            ArchiveOutput::File(destination) => {
                tokio::task::spawn_blocking(move || write_to_file(&request, options, destination))
                    .await??
            }
        };

        tracing::info!(
            archive = %name,
            entries = summary.entries,
            bytes = summary.bytes,
            "Archive created"
        );
        Ok(summary)
    }

    /// `destination` must be a file strictly below the output directory.
    fn check_destination(&self, destination: &Path) -> Result<()> {
        let Some(dir) = &self.output_dir else {
            return Err(ExplorerError::Forbidden(
                "background archives are not enabled".to_string(),
            ));
        };

        let dir = normalize(dir);
        let destination = normalize(destination);
        if destination == dir || !destination.starts_with(&dir) {
            return Err(ExplorerError::Unauthorized(format!(
                "{} is outside the archive directory {}",
                destination.display(),
                dir.display()
            )));
        }
        Ok(())
    }
}

/// Write the zip into `sink` as it is produced.
async fn stream_zip(
    request: ArchiveRequest,
    options: CommandOptions,
    sink: &mut (dyn AsyncWrite + Unpin + Send),
) -> Result<ArchiveSummary> {
    let (mut reader, writer) = tokio::io::duplex(STREAM_BUFFER);
    let writer = SyncIoBridge::new(writer);

    let producer = tokio::task::spawn_blocking(move || {
        let zip = ZipWriter::new_stream(writer);
        let (mut writer, entries) = write_zip(zip, &request, options.compression)?;
        writer
            .flush()
            .map_err(|e| ExplorerError::Internal(format!("stream archive: {}", e)))?;
        Ok::<_, ExplorerError>(entries)
    });

    let copied = tokio::io::copy(&mut reader, &mut *sink).await;
    // Unblocks the writer if the sink failed first.
    drop(reader);
    let produced = producer.await?;

    let bytes = copied.map_err(|e| ExplorerError::Internal(format!("stream archive: {}", e)))?;
    let entries = produced?;
    sink.flush()
        .await
        .map_err(|e| ExplorerError::Internal(format!("stream archive: {}", e)))?;

    Ok(ArchiveSummary {
        entries,
        bytes,
        destination: None,
    })
}

fn compression_method(compression: Compression) -> CompressionMethod {
    match compression {
        Compression::Deflated => CompressionMethod::Deflated,
        Compression::Stored => CompressionMethod::Stored,
    }
}

/// Write every planned entry into `zip` and finish it. Returns the
/// underlying writer and the number of file entries.
fn write_zip<W: Write + Seek>(
    mut zip: ZipWriter<W>,
    request: &ArchiveRequest,
    compression: Compression,
) -> Result<(W, usize)> {
    let plan = request.plan()?;
    let options = SimpleFileOptions::default().compression_method(compression_method(compression));

    let mut files = 0;

    for entry in plan {
        match entry {
            Entry::Directory { name } => {
                zip.add_directory(name, options)?;
            }
            Entry::File { name, source } => {
                let mut file = File::open(&source).map_err(|e| ExplorerError::fs(&source, e))?;
                let size = file
                    .metadata()
                    .map_err(|e| ExplorerError::fs(&source, e))?
                    .len();
                zip.start_file(name, options.large_file(size >= u64::from(u32::MAX)))?;
                io::copy(&mut file, &mut zip).map_err(|e| ExplorerError::fs(&source, e))?;
                files += 1;
            }
        }
    }

    let writer = zip.finish()?;
    Ok((writer, files))
}

fn write_to_file(
    request: &ArchiveRequest,
    options: CommandOptions,
    destination: PathBuf,
) -> Result<ArchiveSummary> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ExplorerError::fs(parent, e))?;

    // Dropped (and deleted) on any error below.
    let temp = NamedTempFile::new_in(parent).map_err(|e| ExplorerError::fs(parent, e))?;
    let (temp, entries) = write_zip(ZipWriter::new(temp), request, options.compression)?;

    temp.as_file()
        .sync_all()
        .map_err(|e| ExplorerError::fs(temp.path(), e))?;
    let file = temp
        .persist(&destination)
        .map_err(|e| ExplorerError::fs(&destination, e.error))?;
    let bytes = file
        .metadata()
        .map_err(|e| ExplorerError::fs(&destination, e))?
        .len();

    Ok(ArchiveSummary {
        entries,
        bytes,
        destination: Some(destination),
    })
}

impl CommandHandler for ArchivePlugin {
    fn kind(&self) -> CommandKind {
        CommandKind::ArchiveCreate
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PathBuf>>> + Send + 'a>> {
        Box::pin(async move {
            let Command::ArchiveCreate(command) = &envelope.command;

            if envelope.user.read_only {
                return Err(ExplorerError::Unauthorized(format!(
                    "{} is read-only",
                    envelope.user.username
                )));
            }

            self.check_destination(&command.temp)?;

            let payload = command.clone();
            let request =
                tokio::task::spawn_blocking(move || ArchiveRequest::from_command(&payload))
                    .await??;

            let summary = self
                .create(
                    request,
                    envelope.options,
                    ArchiveOutput::File(command.temp.clone()),
                )
                .await?;
            Ok(summary.destination)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::UserContext;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn create_test_structure(dir: &Path) {
        fs::create_dir_all(dir.join("dir/sub")).unwrap();
        fs::create_dir_all(dir.join("dir/empty")).unwrap();
        fs::create_dir_all(dir.join("other")).unwrap();
        fs::write(dir.join("a.txt"), "alpha contents").unwrap();
        fs::write(dir.join("dir/b.txt"), "bravo").unwrap();
        fs::write(dir.join("dir/sub/c.bin"), [0u8, 1, 2, 3, 255]).unwrap();
        fs::write(dir.join("other/a.txt"), "second alpha").unwrap();
    }

    fn read_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            if file.is_dir() {
                continue;
            }
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).unwrap();
            entries.push((file.name().to_string(), contents));
        }
        entries.sort();
        entries
    }

    fn names(entries: &[(String, Vec<u8>)]) -> Vec<&str> {
        entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(archive_name(Some("photos")), "photos");
        assert_eq!(archive_name(Some("photos.ZIP")), "photos");
        assert_eq!(archive_name(Some("../../etc/evil")), "evil");
        assert!(archive_name(None).starts_with("archive"));
        assert!(archive_name(Some("  ")).starts_with("archive"));
        assert!(archive_name(Some("..")).starts_with("archive"));
    }

    #[test]
    fn test_unique_names() {
        let mut names = UniqueNames::default();
        assert_eq!(names.claim("a.txt"), "a.txt");
        assert_eq!(names.claim("a.txt"), "a (1).txt");
        assert_eq!(names.claim("a.txt"), "a (2).txt");
        assert_eq!(names.claim("dir/Makefile"), "dir/Makefile");
        assert_eq!(names.claim("dir/Makefile"), "dir/Makefile (1)");
        assert_eq!(names.claim("dir/"), "dir/");
        assert_eq!(names.claim("dir/"), "dir (1)/");
    }

    #[tokio::test]
    async fn test_stream_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let request = ArchiveRequest::new(
            root.clone(),
            "bundle",
            &[PathBuf::from("a.txt"), PathBuf::from("dir/")],
            &[PathBuf::from("dir")],
        )
        .unwrap();

        let mut sink: Vec<u8> = Vec::new();
        let summary = ArchivePlugin::new()
            .create(
                request,
                CommandOptions::default(),
                ArchiveOutput::Stream(&mut sink),
            )
            .await
            .unwrap();

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.bytes, sink.len() as u64);
        assert_eq!(summary.destination, None);

        let entries = read_entries(sink);
        assert_eq!(names(&entries), vec!["a.txt", "dir/b.txt", "dir/sub/c.bin"]);
        for (name, contents) in &entries {
            let original = fs::read(root.as_path().join(name)).unwrap();
            assert_eq!(contents, &original, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_stream_keeps_empty_directories() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let request =
            ArchiveRequest::new(root, "dirs", &[], &[PathBuf::from("dir")]).unwrap();
        let mut sink: Vec<u8> = Vec::new();
        ArchivePlugin::new()
            .create(request, CommandOptions::default(), ArchiveOutput::Stream(&mut sink))
            .await
            .unwrap();

        let archive = ZipArchive::new(Cursor::new(sink)).unwrap();
        let all: Vec<&str> = archive.file_names().collect();
        assert!(all.contains(&"dir/empty/"));
    }

    #[tokio::test]
    async fn test_duplicate_basenames_are_suffixed() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let request = ArchiveRequest::new(
            root,
            "dupes",
            &[PathBuf::from("a.txt"), PathBuf::from("other/a.txt")],
            &[],
        )
        .unwrap();
        let mut sink: Vec<u8> = Vec::new();
        let options = CommandOptions {
            compression: Compression::Stored,
        };
        ArchivePlugin::new()
            .create(request, options, ArchiveOutput::Stream(&mut sink))
            .await
            .unwrap();

        let entries = read_entries(sink);
        assert_eq!(names(&entries), vec!["a (1).txt", "a.txt"]);
        assert_eq!(entries[0].1, b"second alpha".to_vec());
    }

    #[tokio::test]
    async fn test_file_output_is_complete_and_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let request =
            ArchiveRequest::new(root, "saved", &[PathBuf::from("a.txt")], &[]).unwrap();
        let destination = out_dir.path().join("jobs").join(request.file_name());
        let summary = ArchivePlugin::new()
            .create(
                request,
                CommandOptions::default(),
                ArchiveOutput::File(destination.clone()),
            )
            .await
            .unwrap();

        assert_eq!(summary.destination.as_deref(), Some(destination.as_path()));
        let bytes = fs::read(&destination).unwrap();
        assert_eq!(summary.bytes, bytes.len() as u64);
        assert_eq!(names(&read_entries(bytes)), vec!["a.txt"]);

        let leftovers = fs::read_dir(out_dir.path().join("jobs")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_request_rejects_bare_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let result = ArchiveRequest::new(root, "x", &[PathBuf::from("dir")], &[]);
        assert!(matches!(result, Err(ExplorerError::IsADirectory(_))));
    }

    #[test]
    fn test_request_rejects_file_as_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let result = ArchiveRequest::new(root, "x", &[], &[PathBuf::from("a.txt")]);
        assert!(matches!(result, Err(ExplorerError::NotADirectory(_))));
    }

    #[test]
    fn test_request_rejects_escapes() {
        let temp_dir = TempDir::new().unwrap();
        let other_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        fs::write(other_dir.path().join("secret.txt"), "Secret").unwrap();
        std::os::unix::fs::symlink(
            other_dir.path().join("secret.txt"),
            temp_dir.path().join("leak.txt"),
        )
        .unwrap();
        let root = Root::new(temp_dir.path()).unwrap();

        for path in [
            PathBuf::from("../../etc/passwd"),
            other_dir.path().join("secret.txt"),
            PathBuf::from("leak.txt"),
        ] {
            let result = ArchiveRequest::new(root.clone(), "x", &[path.clone()], &[]);
            assert!(
                matches!(result, Err(ExplorerError::Unauthorized(_))),
                "{}",
                path.display()
            );
        }

        let result = ArchiveRequest::new(root, "x", &[], &[PathBuf::from("..")]);
        assert!(matches!(result, Err(ExplorerError::Unauthorized(_))));
    }

    #[test]
    fn test_request_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let root = Root::new(temp_dir.path()).unwrap();

        let result = ArchiveRequest::new(root, "x", &[PathBuf::from("ghost.txt")], &[]);
        assert!(matches!(result, Err(ExplorerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_handler_writes_destination() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let destination = out_dir.path().join("bg.zip");
        let command = Command::ArchiveCreate(ArchiveCreate {
            name: "bg".to_string(),
            paths: vec![root.as_path().join("a.txt")],
            directories: vec![root.as_path().join("dir")],
            temp: destination.clone(),
            root: root.as_path().to_path_buf(),
        });
        let envelope = Envelope::new(UserContext::new("alice", root.as_path()), command);

        let artifact = ArchivePlugin::new()
            .with_output_dir(out_dir.path())
            .handle(&envelope)
            .await
            .unwrap();
        assert_eq!(artifact, Some(destination.clone()));

        let entries = read_entries(fs::read(&destination).unwrap());
        assert_eq!(names(&entries), vec!["a.txt", "dir/b.txt", "dir/sub/c.bin"]);
    }

    #[tokio::test]
    async fn test_handler_rejects_read_only_user() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let command = Command::ArchiveCreate(ArchiveCreate {
            name: "bg".to_string(),
            paths: vec![root.as_path().join("a.txt")],
            directories: Vec::new(),
            temp: temp_dir.path().join("bg.zip"),
            root: root.as_path().to_path_buf(),
        });
        let user = UserContext::new("guest", root.as_path()).read_only(true);
        let envelope = Envelope::new(user, command);

        let result = ArchivePlugin::new().handle(&envelope).await;
        assert!(matches!(result, Err(ExplorerError::Unauthorized(_))));
        assert!(!temp_dir.path().join("bg.zip").exists());
    }

    fn archive_command(root: &Root, temp: PathBuf) -> Envelope {
        let command = Command::ArchiveCreate(ArchiveCreate {
            name: "bg".to_string(),
            paths: vec![root.as_path().join("a.txt")],
            directories: Vec::new(),
            temp,
            root: root.as_path().to_path_buf(),
        });
        Envelope::new(UserContext::new("alice", root.as_path()), command)
    }

    #[tokio::test]
    async fn test_handler_rejects_destination_outside_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();
        let plugin = ArchivePlugin::new().with_output_dir(out_dir.path().join("archives"));

        for temp in [
            temp_dir.path().join("planted.zip"),
            out_dir.path().join("archives/../planted.zip"),
            out_dir.path().join("archives"),
        ] {
            let result = plugin.handle(&archive_command(&root, temp.clone())).await;
            assert!(
                matches!(result, Err(ExplorerError::Unauthorized(_))),
                "{}: {:?}",
                temp.display(),
                result
            );
        }
        assert!(!temp_dir.path().join("planted.zip").exists());
        assert!(!out_dir.path().join("planted.zip").exists());
    }

    #[tokio::test]
    async fn test_handler_without_output_dir_is_forbidden() {
        let temp_dir = TempDir::new().unwrap();
        create_test_structure(temp_dir.path());
        let root = Root::new(temp_dir.path()).unwrap();

        let envelope = archive_command(&root, temp_dir.path().join("bg.zip"));
        let result = ArchivePlugin::new().handle(&envelope).await;
        assert!(matches!(result, Err(ExplorerError::Forbidden(_))));
        assert!(!temp_dir.path().join("bg.zip").exists());
    }

    #[tokio::test]
    async fn test_stream_waits_for_slow_reader() {
        let temp_dir = TempDir::new().unwrap();
        let contents: Vec<u8> = (0..1024 * 1024u32).map(|i| (i * 7 % 251) as u8).collect();
        fs::write(temp_dir.path().join("large.bin"), &contents).unwrap();
        let root = Root::new(temp_dir.path()).unwrap();

        let request =
            ArchiveRequest::new(root, "large", &[PathBuf::from("large.bin")], &[]).unwrap();
        let options = CommandOptions {
            compression: Compression::Stored,
        };

        let (mut client, server) = tokio::io::duplex(1024);
        let producer = tokio::spawn(async move {
            let mut server = server;
            ArchivePlugin::new()
                .create(request, options, ArchiveOutput::Stream(&mut server))
                .await
        });

        // Nothing is read yet, so the writer must be held back by the pipe.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!producer.is_finished());

        let mut received = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = tokio::io::AsyncReadExt::read(&mut client, &mut chunk)
                .await
                .unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
        }

        let summary = producer.await.unwrap().unwrap();
        assert_eq!(summary.bytes, received.len() as u64);
        assert!(received.len() > contents.len());

        let entries = read_entries(received);
        assert_eq!(names(&entries), vec!["large.bin"]);
        assert_eq!(entries[0].1, contents);
    }

    #[tokio::test]
    async fn test_stream_fails_when_sink_closes() {
        let temp_dir = TempDir::new().unwrap();
        let contents = vec![3u8; 512 * 1024];
        fs::write(temp_dir.path().join("large.bin"), &contents).unwrap();
        let root = Root::new(temp_dir.path()).unwrap();

        let request =
            ArchiveRequest::new(root, "large", &[PathBuf::from("large.bin")], &[]).unwrap();
        let options = CommandOptions {
            compression: Compression::Stored,
        };

        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let result = ArchivePlugin::new()
            .create(request, options, ArchiveOutput::Stream(&mut server))
            .await;
        assert!(result.is_err());
    }
}
