//! PID file utilities for the job worker singleton.
//!
//! Only one job worker may run per data directory. The worker writes its PID
//! to `<data_dir>/jobd.pid` on startup; a PID file naming a process that no
//! longer exists is stale and removed on sight.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the PID file inside the data directory.
const PID_FILE_NAME: &str = "jobd.pid";

/// Path of the PID file for `data_dir`.
pub fn pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PID_FILE_NAME)
}

/// PID of the live process recorded in `path`, if any.
///
/// Unparseable or stale PID files are removed.
pub fn read_pid(path: &Path) -> Option<u32> {
    let pid_str = fs::read_to_string(path).ok()?;

    let pid: u32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => {
            cleanup_stale_pid_file(path);
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

/// Whether a live worker holds the PID file at `path`.
pub fn is_running(path: &Path) -> bool {
    read_pid(path).is_some()
}

/// Check if a process with the given PID is running.
///
/// On Linux, this checks if `/proc/{pid}/stat` exists. On other Unix
/// systems it sends signal 0, which only checks that the process exists.
fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}/stat", pid)).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // EPERM: the process exists but belongs to someone else.
        matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Remove a stale PID file.
fn cleanup_stale_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove stale PID file {:?}: {}", path, e);
        }
    }
}

/// Held PID file. Removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current process in `path`.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] when another live process
    /// already holds the file.
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        if let Some(pid) = read_pid(&path) {
            if pid != std::process::id() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("job worker already running (PID: {})", pid),
                ));
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{}\n", std::process::id()))?;

        Ok(Self { path })
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(std::process::id()) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_pid_file_path_structure() {
        let path = pid_file_path(Path::new("/var/lib/explorer"));
        assert_eq!(path, PathBuf::from("/var/lib/explorer/jobd.pid"));
    }

    #[test]
    fn test_read_pid_no_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(read_pid(&temp_dir.path().join("jobd.pid")), None);
    }

    #[test]
    fn test_is_process_running_current() {
        let pid = std::process::id();
        assert!(
            is_process_running(pid),
            "Current process should be detected as running"
        );
    }

    #[test]
    fn test_is_process_running_rejects_pid_zero() {
        assert!(!is_process_running(0));
    }

    #[test]
    fn test_is_process_running_invalid() {
        assert!(
            !is_process_running(4_000_000_000),
            "Invalid PID should not be running"
        );
    }

    #[test]
    fn test_read_pid_removes_stale_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("jobd.pid");

        let mut file = fs::File::create(&pid_file).unwrap();
        writeln!(file, "4000000000").unwrap();
        drop(file);

        assert_eq!(read_pid(&pid_file), None);
        assert!(!pid_file.exists(), "Stale PID file should be cleaned up");
    }

    #[test]
    fn test_read_pid_removes_garbage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("jobd.pid");
        fs::write(&pid_file, "not a pid").unwrap();

        assert!(!is_running(&pid_file));
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_acquire_writes_and_releases() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("nested").join("jobd.pid");

        let guard = PidFile::acquire(&pid_file).unwrap();
        assert_eq!(guard.path(), pid_file.as_path());
        assert_eq!(read_pid(&pid_file), Some(std::process::id()));

        drop(guard);
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_acquire_refuses_live_holder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("jobd.pid");

        // PID 1 is always alive on Unix.
        fs::write(&pid_file, "1\n").unwrap();

        let err = PidFile::acquire(&pid_file).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&pid_file).unwrap().trim(), "1");
    }

    #[test]
    fn test_acquire_replaces_stale() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pid_file = temp_dir.path().join("jobd.pid");
        fs::write(&pid_file, "4000000000\n").unwrap();

        let _guard = PidFile::acquire(&pid_file).unwrap();
        assert_eq!(read_pid(&pid_file), Some(std::process::id()));
    }
}
