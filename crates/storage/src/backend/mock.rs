//! In-memory provider for tests in dependent crates (feature `mock`).
//!
//! Behaves like a well-behaved flat-namespace backend, plus a couple of
//! failure-injection switches for exercising error paths without a real
//! backend outage.

use crate::backend::{
    ByteSource, ConnectionReport, DeletePolicy, PutOptions, StorageProvider, StoredPath,
};
use crate::error::{ErrorKind, Result};
use crate::file::FileMetadata;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::UtcDateTime;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

#[derive(Clone)]
struct MockFile {
    data: Vec<u8>,
    mime: Option<String>,
    modified: UtcDateTime,
}

#[derive(Default)]
pub struct MockProvider {
    files: RwLock<HashMap<PathBuf, MockFile>>,
    directories: RwLock<HashSet<PathBuf>>,
    corrupt_reads: AtomicBool,
    fail_puts: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `get` returns content with its first byte flipped.
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        self.corrupt_reads.store(corrupt, Ordering::SeqCst);
    }

    /// Every subsequent `put` fails with `BackendUnavailable`.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::BestEffort
    }

    async fn put(&self, path: &Path, data: &[u8], options: &PutOptions) -> Result<StoredPath> {
        if self.fail_puts.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::BackendUnavailable("simulated write outage".to_string()));
        }
        let logical = validate_path(path)?;
        let file = MockFile {
            data: data.to_vec(),
            mime: options.content_type.clone(),
            modified: UtcDateTime::now(),
        };
        self.files.write().await.insert(logical.clone(), file);
        Ok(StoredPath::new(logical.to_string_lossy()))
    }

    async fn put_stream(&self, path: &Path, mut reader: ByteSource, options: &PutOptions) -> Result<StoredPath> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
        self.put(path, &buffer, options).await
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let logical = validate_path(path)?;
        let files = self.files.read().await;
        let file = files.get(&logical).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(logical.clone())))?;
        let mut data = file.data.clone();
        if self.corrupt_reads.load(Ordering::SeqCst) {
            if let Some(first) = data.first_mut() {
                *first = !*first;
            }
        }
        Ok(data)
    }

    async fn get_stream(&self, path: &Path) -> Result<ByteSource> {
        let data = self.get(path).await?;
        Ok(Box::pin(std::io::Cursor::new(data)))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let logical = validate_path(path)?;
        Ok(self.files.read().await.contains_key(&logical))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let logical = validate_path(path)?;
        self.files.write().await.remove(&logical);
        Ok(())
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let from = validate_path(source)?;
        let to = validate_path(destination)?;
        let mut files = self.files.write().await;
        let file = files.get(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from.clone())))?.clone();
        files.insert(to, file);
        Ok(())
    }

    async fn rename(&self, source: &Path, destination: &Path) -> Result<()> {
        let from = validate_path(source)?;
        let to = validate_path(destination)?;
        let mut files = self.files.write().await;
        let file = files.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from.clone())))?;
        files.insert(to, file);
        Ok(())
    }

    async fn url(&self, path: &Path) -> Result<String> {
        let logical = validate_path(path)?;
        Ok(format!("mock://{}", logical.display()))
    }

    async fn signed_url(&self, path: &Path, _expires_in: Duration) -> Result<String> {
        self.url(path).await
    }

    async fn stat(&self, path: &Path) -> Result<FileMetadata> {
        let logical = validate_path(path)?;
        if self.directories.read().await.contains(&logical) {
            return Ok(FileMetadata::directory(logical));
        }
        let files = self.files.read().await;
        let file = files.get(&logical).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(logical.clone())))?;
        Ok(FileMetadata::file(logical, file.data.len() as u64)
            .with_mime_type(file.mime.clone())
            .with_last_modified(Some(file.modified)))
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileMetadata>> {
        let base = prefix.map(validate_path).transpose()?;
        let base = base.as_deref();
        let files = self.files.read().await;
        let mut entries = Vec::new();
        let mut seen_dirs = HashSet::new();
        for (path, file) in files.iter() {
            let relative = match base {
                Some(base) => match path.strip_prefix(base) {
                    Ok(rest) => rest,
                    Err(_) => continue,
                },
                None => path.as_path(),
            };
            let mut components = relative.components();
            let Some(first) = components.next() else { continue };
            let head: PathBuf = base.map(|b| b.join(first)).unwrap_or_else(|| PathBuf::from(first.as_os_str()));
            if components.next().is_some() {
                // Deeper entry: surfaces as a directory at this level.
                if seen_dirs.insert(head.clone()) {
                    entries.push(FileMetadata::directory(head));
                }
            } else {
                entries.push(
                    FileMetadata::file(head, file.data.len() as u64).with_mime_type(file.mime.clone()),
                );
            }
        }
        for dir in self.directories.read().await.iter() {
            let parent_matches = match base {
                Some(base) => dir.parent() == Some(base),
                None => dir.parent() == Some(Path::new("")),
            };
            if parent_matches && seen_dirs.insert(dir.clone()) {
                entries.push(FileMetadata::directory(dir.clone()));
            }
        }
        Ok(entries)
    }

    async fn make_directory(&self, path: &Path) -> Result<()> {
        let logical = validate_path(path)?;
        self.directories.write().await.insert(logical);
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionReport {
        ConnectionReport::ok("mock storage ready")
    }
}
