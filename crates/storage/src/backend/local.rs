//! Local filesystem storage provider.
//!
//! Files are stored in a configured directory and accessed using standard
//! filesystem operations via `tokio::fs` for async I/O.

use crate::backend::{
    ByteSource, ConnectionReport, DeletePolicy, PutOptions, StorageProvider, StoredPath,
};
use crate::error::{ErrorKind, Result};
use crate::file::FileMetadata;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Local filesystem storage provider.
///
/// Stores files in a directory on the local filesystem. All logical paths
/// are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use fieldops_storage::backend::LocalProvider;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = LocalProvider::new("/var/lib/fieldops/storage")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalProvider {
    root: PathBuf,
}
impl LocalProvider {
    /// Create a new local filesystem provider.
    ///
    /// The root directory is created if absent (tolerating another process
    /// creating it first) and probed for read/write access. Initialization
    /// fails hard with [`ErrorKind::ConfigurationInvalid`] if the directory
    /// cannot be created or written — a storage root that cannot prove
    /// writability must never be silently accepted.
    ///
    /// Uses sync I/O; this only happens once when the factory builds the
    /// provider and it's not worth making the constructor async.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                "storage base path must be absolute, got `{}`",
                root.display()
            )));
        }

        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                    "storage base path `{}` exists but is not a directory",
                    root.display()
                )));
            }
        } else if let Err(e) = std::fs::create_dir_all(&root) {
            // create_dir_all already tolerates a concurrent create; anything
            // surfacing here is a real failure.
            exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                "cannot create storage base path `{}`: {e}",
                root.display()
            )));
        }

        let probe = root.join(".fieldops-write-probe");
        if let Err(e) = std::fs::write(&probe, b"probe").and_then(|()| std::fs::remove_file(&probe)) {
            exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                "storage base path `{}` is not writable: {e}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Get the absolute path for a relative storage path.
    ///
    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                ErrorKind::NotAuthorized(format!("permission denied: {}", path.display()))
            },
            _ => ErrorKind::Io(e),
        }
    }

    async fn create_parents(&self, abs_path: &Path, logical: &Path) -> Result<()> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, logical))?;
        }
        Ok(())
    }

    fn entry_metadata(relative: PathBuf, metadata: &std::fs::Metadata) -> FileMetadata {
        let modified = metadata.modified().ok().map(time::UtcDateTime::from);
        match metadata.is_dir() {
            true => FileMetadata::directory(relative),
            false => FileMetadata::file(relative, metadata.len()).with_last_modified(modified),
        }
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::BestEffort
    }

    async fn put(&self, path: &Path, data: &[u8], _options: &PutOptions) -> Result<StoredPath> {
        // Content-type and visibility hints have nowhere to live on a plain
        // filesystem; they are silently ignored.
        let logical = validate_path(path)?;
        let abs_path = self.root.join(&logical);
        self.create_parents(&abs_path, path).await?;
        fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(StoredPath::new(logical.to_string_lossy()))
    }

    async fn put_stream(&self, path: &Path, mut reader: ByteSource, _options: &PutOptions) -> Result<StoredPath> {
        let logical = validate_path(path)?;
        let abs_path = self.root.join(&logical);
        self.create_parents(&abs_path, path).await?;
        let mut file = fs::File::create(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        tokio::io::copy(&mut reader, &mut file).await.map_err(|e| Self::map_io_error(e, path))?;
        file.flush().await.map_err(ErrorKind::Io)?;
        Ok(StoredPath::new(logical.to_string_lossy()))
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn get_stream(&self, path: &Path) -> Result<ByteSource> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::pin(file))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        match fs::remove_file(&abs_path).await {
            Ok(()) => Ok(()),
            // Idempotent delete: already gone is fine.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            // Best-effort policy: a failed delete must not block the business
            // operation that triggered it.
            Err(e) => {
                warn!(path = %path.display(), error = %e, "best-effort delete failed");
                Ok(())
            },
        }
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let from = self.absolute_path(source)?;
        let to = self.absolute_path(destination)?;
        self.create_parents(&to, destination).await?;
        fs::copy(&from, &to).await.map_err(|e| Self::map_io_error(e, source))?;
        Ok(())
    }

    async fn rename(&self, source: &Path, destination: &Path) -> Result<()> {
        let from = self.absolute_path(source)?;
        let to = self.absolute_path(destination)?;
        self.create_parents(&to, destination).await?;
        Ok(fs::rename(&from, &to).await.map_err(|e| Self::map_io_error(e, source))?)
    }

    async fn url(&self, path: &Path) -> Result<String> {
        // Local storage has no web endpoint of its own; the reference is the
        // relative logical path, served by the surrounding application.
        let validated = validate_path(path)?;
        Ok(validated.to_string_lossy().into_owned())
    }

    async fn signed_url(&self, path: &Path, _expires_in: Duration) -> Result<String> {
        // No credential to time-bound on a local filesystem.
        self.url(path).await
    }

    async fn stat(&self, path: &Path) -> Result<FileMetadata> {
        let validated = validate_path(path)?;
        let abs_path = self.root.join(&validated);
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Self::entry_metadata(validated, &metadata))
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileMetadata>> {
        let validated_prefix = prefix.map(validate_path).transpose()?;
        let dir = match &validated_prefix {
            Some(p) => self.root.join(p),
            None => self.root.clone(),
        };
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // To stay consistent with object-store semantics, listing a
            // directory that doesn't exist is an empty list, not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::map_io_error(e, &dir).into()),
        };
        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            let metadata = entry.metadata().await.map_err(ErrorKind::Io)?;
            if !metadata.is_dir() && !metadata.is_file() {
                // Silently drop what is most likely a broken symlink.
                continue;
            }
            let relative = match &validated_prefix {
                Some(p) => p.join(entry.file_name()),
                None => PathBuf::from(entry.file_name()),
            };
            results.push(Self::entry_metadata(relative, &metadata));
        }
        Ok(results)
    }

    async fn make_directory(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::create_dir_all(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn test_connection(&self) -> ConnectionReport {
        let probe = Path::new(".fieldops-connection-probe");
        match self.put(probe, b"probe", &PutOptions::default()).await {
            Ok(_) => {},
            Err(e) => {
                return ConnectionReport::failed(format!(
                    "cannot write to `{}`: {e}",
                    self.root.display()
                ));
            },
        }
        if let Err(e) = self.get(probe).await {
            return ConnectionReport::failed(format!("cannot read back from `{}`: {e}", self.root.display()));
        }
        _ = self.delete(probe).await;
        ConnectionReport::ok(format!("local storage at `{}` is readable and writable", self.root.display()))
    }
}
