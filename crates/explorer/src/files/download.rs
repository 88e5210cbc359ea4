//! Single-file downloads.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::classify::{classify, Disposition, FileType};
use super::guard::Root;
use crate::error::{ExplorerError, Result};

/// A file ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Download {
    /// Resolved absolute path.
    pub path: PathBuf,
    /// Name offered to the client.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Type classification.
    pub file_type: FileType,
    /// Inline view or attachment.
    pub disposition: Disposition,
    /// MIME type guessed from the extension.
    pub mime: String,
}

impl Download {
    /// `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        let kind = match self.disposition {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        };
        let name: String = self
            .file_name
            .chars()
            .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
            .collect();
        format!("{}; filename=\"{}\"", kind, name)
    }

    /// Open the file for streaming.
    pub async fn open(&self) -> Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| ExplorerError::fs(&self.path, e))
    }
}

/// Confine `user_path`, follow symlinks, and describe the file.
///
/// The root itself is `Unauthorized`, a directory is `IsADirectory`, and a
/// symlink leading out of the root is `Unauthorized`.
pub async fn prepare_download(root: &Root, user_path: impl AsRef<Path>) -> Result<Download> {
    let guarded = root.confine(user_path);
    if guarded.is_root() {
        return Err(ExplorerError::Unauthorized(
            "download requires a file inside the root".to_string(),
        ));
    }

    let root = root.clone();
    tokio::task::spawn_blocking(move || {
        let resolved = guarded.resolve(&root)?;
        let metadata =
            std::fs::metadata(&resolved).map_err(|e| ExplorerError::fs(&resolved, e))?;
        if metadata.is_dir() || resolved.is_root() {
            return Err(ExplorerError::IsADirectory(guarded.into_path_buf()));
        }

        let file_type = classify(resolved.as_path(), false);
        let file_name = guarded.file_name().unwrap_or_default();
        let mime = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();

        tracing::debug!(path = %resolved.as_path().display(), ?file_type, "Prepared download");

        Ok(Download {
            path: resolved.into_path_buf(),
            file_name,
            size: metadata.len(),
            file_type,
            disposition: file_type.disposition_for(&mime),
            mime,
        })
    })
    .await?
}
