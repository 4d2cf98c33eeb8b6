//! Storage provider trait and implementations.
//!
//! This module defines the `StorageProvider` trait, the uniform contract
//! every backend (local filesystem, S3-compatible object storage, and the
//! hierarchical cloud drive) implements. Callers go through the factory in
//! `fieldops-config` and never branch on the concrete backend.

pub mod drive;
mod local;
#[cfg(feature = "mock")]
mod mock;
mod s3;

pub use self::drive::DriveProvider;
pub use self::local::LocalProvider;
#[cfg(feature = "mock")]
pub use self::mock::MockProvider;
pub use self::s3::ObjectStoreProvider;
use crate::error::Result;
use crate::file::FileMetadata;
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;

/// A boxed async byte stream, used for streamed uploads and downloads so
/// that large files never need to be fully materialized in memory.
pub type ByteSource = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Default expiry for [`StorageProvider::signed_url`].
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Opaque token returned by [`StorageProvider::put`].
///
/// Callers persist this verbatim (e.g. in an attachment's `file_path`
/// column) and replay it on subsequent operations. For the local and
/// object-store providers it is the normalized logical path; for the
/// hierarchical drive it is a `gdrive://<node-id>` reference embedding the
/// created node's identifier.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub struct StoredPath(String);
impl StoredPath {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Requested visibility for an uploaded file.
///
/// Backends that cannot honor a visibility hint silently ignore it (the
/// hierarchical drive has no per-object ACLs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Optional hints passed to [`StorageProvider::put`].
///
/// Unsupported hints are silently ignored by backends that cannot honor
/// them; they never cause an error.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Content-type hint stored alongside the object where supported.
    pub content_type: Option<String>,
    /// ACL/visibility hint, honored by the object store only.
    pub visibility: Option<Visibility>,
}
impl PutOptions {
    pub fn content_type(mime: impl Into<String>) -> Self {
        Self { content_type: Some(mime.into()), ..Self::default() }
    }
}

/// Per-backend policy for [`StorageProvider::delete`] failures.
///
/// The asymmetry is deliberate and load-bearing: removing a stale attachment
/// record must not fail the surrounding business operation just because the
/// object was already gone, so the local and object-store providers log and
/// continue. The hierarchical drive propagates delete failures because a
/// leaked node there is user-visible in the drive UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Failures are logged at `warn` and swallowed; absent files are a no-op.
    BestEffort,
    /// Failures propagate to the caller; absent files are still a no-op.
    FailLoud,
}

/// Result of [`StorageProvider::test_connection`].
///
/// The message is surfaced verbatim to the operator configuring storage, so
/// implementations keep it specific: "bucket not found" and "access denied"
/// are different problems with different fixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
}
impl ConnectionReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Uniform interface for storage backends.
///
/// All operations are asynchronous and every operation's completion must be
/// awaited — nothing here is fire-and-forget. Failures propagate as the
/// error taxonomy in [`crate::error`], with one documented exception:
/// `delete` on a [`DeletePolicy::BestEffort`] backend degrades to a logged
/// warning.
///
/// # Path Handling
/// Logical paths are relative to the storage root and are validated with
/// [`validate_path`](crate::validate_path) by every implementation before
/// use. The hierarchical drive additionally accepts opaque
/// `gdrive://<node-id>` references (see [`StoredPath`]) wherever a path is
/// expected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use fieldops_storage::{StorageProvider, PutOptions, error::Result};
///
/// async fn upload_if_absent(provider: &dyn StorageProvider, path: &Path, data: &[u8]) -> Result<()> {
///     if !provider.exists(path).await? {
///         provider.put(path, data, &PutOptions::default()).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Name of the configured backend driver (used for logging only).
    fn name(&self) -> &str;

    /// The delete failure policy this backend was built with.
    fn delete_policy(&self) -> DeletePolicy;

    /// Write file contents, creating or overwriting the destination.
    ///
    /// Returns the opaque token the caller must persist. Implementations
    /// create intermediate directories/folders as needed.
    async fn put(&self, path: &Path, data: &[u8], options: &PutOptions) -> Result<StoredPath>;

    /// Streamed variant of [`put`](Self::put) for large uploads.
    ///
    /// Implementations must not require the whole file to be buffered;
    /// where a backend's API demands a known length, the limitation is
    /// documented on the implementation rather than papered over here.
    async fn put_stream(&self, path: &Path, reader: ByteSource, options: &PutOptions) -> Result<StoredPath>;

    /// Read the complete file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn get(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open the file for streaming reads.
    ///
    /// Mandatory so that the serving layer never has to materialize a large
    /// download in memory. The async setup (opening the file/connection)
    /// happens before returning.
    async fn get_stream(&self, path: &Path) -> Result<ByteSource>;

    /// Check if a file exists.
    ///
    /// A missing file is a normal `Ok(false)`, never an error.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Delete a file.
    ///
    /// Deleting an already-absent file is not an error on any backend.
    /// Other failures follow [`delete_policy`](Self::delete_policy).
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Copy a file within the same backend, overwriting the destination.
    async fn copy(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Move a file within the same backend.
    ///
    /// Copy-then-delete-source where the backend has no atomic rename
    /// (local, object store); a metadata-only re-parent on the hierarchical
    /// drive, which also renames when the destination basename differs.
    async fn rename(&self, source: &Path, destination: &Path) -> Result<()>;

    /// A reference usable to access the file.
    ///
    /// A relative path for local storage, a time-limited signed URL for the
    /// object store (delegates to [`signed_url`](Self::signed_url)), and an
    /// authenticated view link for the hierarchical drive.
    async fn url(&self, path: &Path) -> Result<String>;

    /// A time-bounded access URL.
    ///
    /// Time-bounded for the object store. The hierarchical drive cannot
    /// mint a scoped, expiring credential and returns its best available
    /// authenticated download link instead — a documented limitation, not
    /// silently "fixed".
    async fn signed_url(&self, path: &Path, expires_in: Duration) -> Result<String>;

    /// Get file metadata without reading contents.
    async fn stat(&self, path: &Path) -> Result<FileMetadata>;

    /// List a single directory level, optionally under a prefix.
    ///
    /// Non-recursive on every backend by contract; directory-like entries
    /// are returned with [`FileMetadata::is_directory`] set.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileMetadata>>;

    /// Create a directory (or the backend's nearest equivalent).
    ///
    /// A no-op on the object store, which has no directories.
    async fn make_directory(&self, path: &Path) -> Result<()>;

    /// Probe the backend with the configured credentials.
    ///
    /// Used to validate a candidate configuration before it is persisted;
    /// never panics and never returns `Err` — failures are reported in the
    /// [`ConnectionReport`] message so the operator sees the exact cause.
    async fn test_connection(&self) -> ConnectionReport;
}
