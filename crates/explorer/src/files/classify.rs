//! File type classification.
//!
//! Types decide whether a download is shown inline or sent as an attachment,
//! and feed the `type` sort key.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions treated as archives regardless of their MIME type.
const ARCHIVE_EXTENSIONS: &[&str] = &[
    "zip", "tar", "gz", "tgz", "bz2", "tbz2", "xz", "txz", "7z", "rar", "zst",
];

/// MIME types a browser may execute script from when shown inline.
const ACTIVE_CONTENT: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "image/svg+xml",
    "text/xml",
    "application/xml",
    "text/xsl",
    "application/xslt+xml",
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
];

/// Bytes inspected when the extension says nothing.
const SNIFF_LEN: usize = 512;

/// Coarse classification of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// A directory.
    Directory,
    /// Compressed or bundled files.
    Archive,
    /// Pictures.
    Image,
    /// Human-readable text.
    Text,
    /// Anything else.
    Other,
}

/// How a download should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Show in the browser.
    Inline,
    /// Save as a file.
    Attachment,
}

impl FileType {
    /// Inline for images and text, attachment for everything else.
    pub fn disposition(&self) -> Disposition {
        match self {
            FileType::Image | FileType::Text => Disposition::Inline,
            _ => Disposition::Attachment,
        }
    }

    /// Like [`FileType::disposition`], but active content served as `mime`
    /// is always an attachment.
    pub fn disposition_for(&self, mime: &str) -> Disposition {
        if is_active_content(mime) {
            Disposition::Attachment
        } else {
            self.disposition()
        }
    }

    /// Classify by name only. Returns `None` when the extension is unknown.
    pub fn from_extension(path: &Path) -> Option<FileType> {
        let extension = path.extension()?.to_string_lossy().to_lowercase();

        if ARCHIVE_EXTENSIONS.contains(&extension.as_str()) {
            return Some(FileType::Archive);
        }

        let mime = mime_guess::from_ext(&extension).first()?;
        let file_type = match (mime.type_().as_str(), mime.subtype().as_str()) {
            ("image", _) => FileType::Image,
            ("text", _) => FileType::Text,
            ("application", "json" | "xml" | "javascript" | "toml" | "x-sh" | "x-yaml") => {
                FileType::Text
            }
            _ => FileType::Other,
        };
        Some(file_type)
    }
}

/// Whether a browser rendering `mime` could run script from it.
pub fn is_active_content(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    ACTIVE_CONTENT
        .iter()
        .any(|active| essence.eq_ignore_ascii_case(active))
}

/// Classify a listing entry.
///
/// Directories are always [`FileType::Directory`]. Files are classified by
/// extension; when that is inconclusive the first bytes are inspected and
/// anything without NUL bytes that decodes as UTF-8 counts as text.
pub fn classify(path: &Path, is_directory: bool) -> FileType {
    if is_directory {
        return FileType::Directory;
    }

    if let Some(file_type) = FileType::from_extension(path) {
        return file_type;
    }

    match sniff(path) {
        Some(head) if looks_like_text(&head) => FileType::Text,
        _ => FileType::Other,
    }
}

fn sniff(path: &Path) -> Option<Vec<u8>> {
    let file = std::fs::File::open(path).ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).ok()?;
    Some(head)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() || head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut at the sniff boundary is still text.
        Err(e) => e.error_len().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_extension() {
        assert_eq!(
            FileType::from_extension(Path::new("a.PNG")),
            Some(FileType::Image)
        );
        assert_eq!(
            FileType::from_extension(Path::new("notes.txt")),
            Some(FileType::Text)
        );
        assert_eq!(
            FileType::from_extension(Path::new("backup.tar.gz")),
            Some(FileType::Archive)
        );
        assert_eq!(
            FileType::from_extension(Path::new("data.json")),
            Some(FileType::Text)
        );
        assert_eq!(
            FileType::from_extension(Path::new("movie.mp4")),
            Some(FileType::Other)
        );
        assert_eq!(FileType::from_extension(Path::new("Makefile")), None);
    }

    #[test]
    fn test_disposition() {
        assert_eq!(FileType::Image.disposition(), Disposition::Inline);
        assert_eq!(FileType::Text.disposition(), Disposition::Inline);
        assert_eq!(FileType::Archive.disposition(), Disposition::Attachment);
        assert_eq!(FileType::Other.disposition(), Disposition::Attachment);
    }

    #[test]
    fn test_active_content_is_attachment() {
        for mime in [
            "text/html",
            "image/svg+xml",
            "application/xml",
            "text/html; charset=utf-8",
            "Application/XHTML+XML",
        ] {
            assert!(is_active_content(mime), "{}", mime);
            assert_eq!(FileType::Text.disposition_for(mime), Disposition::Attachment);
            assert_eq!(FileType::Image.disposition_for(mime), Disposition::Attachment);
        }

        assert!(!is_active_content("image/png"));
        assert_eq!(FileType::Image.disposition_for("image/png"), Disposition::Inline);
        assert_eq!(FileType::Text.disposition_for("text/plain"), Disposition::Inline);
    }

    #[test]
    fn test_classify_sniffs_unknown_extension() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("README"), "plain words\n").unwrap();
        fs::write(temp_dir.path().join("blob"), [0u8, 159, 146, 150]).unwrap();
        fs::write(temp_dir.path().join("empty"), "").unwrap();

        assert_eq!(classify(&temp_dir.path().join("README"), false), FileType::Text);
        assert_eq!(classify(&temp_dir.path().join("blob"), false), FileType::Other);
        assert_eq!(classify(&temp_dir.path().join("empty"), false), FileType::Other);
    }

    #[test]
    fn test_classify_directory() {
        assert_eq!(classify(Path::new("/any/photos.zip"), true), FileType::Directory);
    }

    #[test]
    fn test_truncated_utf8_is_text() {
        let mut head = "caf".as_bytes().to_vec();
        head.push(0xC3);
        assert!(looks_like_text(&head));
    }
}
