//! Canonical file metadata returned by every provider.

use std::path::PathBuf;
use time::UtcDateTime;

/// File metadata normalized across backends.
///
/// Each backend represents size, timestamps and content types natively (the
/// object store returns RFC 1123 strings, the drive returns stringified
/// integers); providers normalize everything into this shape before
/// returning it from [`stat`](crate::StorageProvider::stat) or
/// [`list`](crate::StorageProvider::list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Logical path relative to the storage root
    pub path: PathBuf,
    /// Base name of the file or directory
    pub name: String,
    /// Size in bytes (zero for directories on backends that track none)
    pub size: u64,
    /// Content type, when the backend records one
    pub mime_type: Option<String>,
    /// Last modification timestamp, when the backend records one
    pub last_modified: Option<UtcDateTime>,
    /// Whether the entry is a directory (or directory-like common prefix)
    pub is_directory: bool,
}

impl FileMetadata {
    /// Metadata for a regular file.
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = Self::basename(&path);
        Self {
            path,
            name,
            size,
            mime_type: None,
            last_modified: None,
            is_directory: false,
        }
    }

    /// Metadata for a directory entry (or a listing's common prefix).
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = Self::basename(&path);
        Self {
            path,
            name,
            size: 0,
            mime_type: None,
            last_modified: None,
            is_directory: true,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<Option<String>>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_last_modified(mut self, modified: impl Into<Option<UtcDateTime>>) -> Self {
        self.last_modified = modified.into();
        self
    }

    fn basename(path: &PathBuf) -> String {
        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_file_basename() {
        let meta = FileMetadata::file("projects/42/files/report.pdf", 1024);
        assert_eq!(meta.name, "report.pdf");
        assert_eq!(meta.path, Path::new("projects/42/files/report.pdf"));
        assert!(!meta.is_directory);
    }

    #[test]
    fn test_directory() {
        let meta = FileMetadata::directory("projects/42");
        assert_eq!(meta.name, "42");
        assert_eq!(meta.size, 0);
        assert!(meta.is_directory);
    }

    #[test]
    fn test_builders() {
        let meta = FileMetadata::file("a.png", 10).with_mime_type("image/png".to_string());
        assert_eq!(meta.mime_type.as_deref(), Some("image/png"));
        assert!(meta.last_modified.is_none());
    }
}
