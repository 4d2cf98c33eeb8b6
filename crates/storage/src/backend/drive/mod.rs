//! Hierarchical drive provider.
//!
//! Unlike the flat-namespace backends, the drive addresses content by node
//! id inside a folder tree, so every logical path has to be translated into
//! a chain of folder lookups. Three things keep that workable:
//!
//! * uploads return an opaque `gdrive://<node-id>` token which later
//!   operations accept anywhere a path is expected, skipping resolution
//!   entirely;
//! * resolved folder ids are cached with a TTL (see [`cache`]);
//! * `put` to an existing name replaces the node's *content* rather than
//!   creating a sibling, so the node id (and any persisted token) stays
//!   stable across re-uploads.
//!
//! Deletes are fail-loud here: a leaked node is visible to users browsing
//! the drive, unlike an orphaned object in a bucket.

mod api;
mod cache;

pub use self::api::{DriveApi, DriveNode, GoogleDriveApi};
pub use self::cache::{DEFAULT_FOLDER_TTL, FolderCache};

use crate::backend::{
    ByteSource, ConnectionReport, DeletePolicy, PutOptions, StorageProvider, StoredPath,
};
use crate::error::{ErrorKind, Result};
use crate::file::FileMetadata;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use exn::OptionExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::debug;

/// Scheme marking an opaque node reference in place of a logical path.
pub const NODE_REF_SCHEME: &str = "gdrive://";

/// Alias the drive API accepts for the account's implicit root folder.
const IMPLICIT_ROOT: &str = "root";

/// Where logical paths are anchored in the drive hierarchy.
enum RootSpec {
    /// A fixed folder id from the configuration; verified reachable on
    /// first use.
    FolderId(String),
    /// No fixed folder configured: a folder chain named after the base
    /// path is found or created under the account's implicit root.
    BaseFolder(String),
}

/// Storage provider backed by a hierarchical cloud drive.
///
/// Generic over [`DriveApi`] so the path-resolution and caching logic can be
/// exercised against an in-memory double; production code uses
/// [`GoogleDriveApi`] via [`DriveProvider::new`].
pub struct DriveProvider<A: DriveApi = GoogleDriveApi> {
    api: A,
    root: RootSpec,
    resolved_root: OnceCell<String>,
    cache: FolderCache,
}

impl DriveProvider<GoogleDriveApi> {
    /// Build a provider from an OAuth2 access token and the configured root.
    ///
    /// With a root folder id set, all logical paths resolve relative to that
    /// folder and its reachability is verified on first use. Without one,
    /// `base_folder` names a folder chain that is found or created under the
    /// account's implicit root. One of the two must be present.
    pub fn new(
        access_token: impl Into<String>,
        root_folder_id: Option<&str>,
        base_folder: Option<&str>,
    ) -> Result<Self> {
        let api = GoogleDriveApi::new(access_token)?;
        let folder_id = root_folder_id.map(str::trim).filter(|v| !v.is_empty());
        let base = base_folder.map(str::trim).filter(|v| !v.is_empty());
        let root = match (folder_id, base) {
            (Some(id), _) => RootSpec::FolderId(id.to_string()),
            (None, Some(name)) => RootSpec::BaseFolder(name.to_string()),
            (None, None) => exn::bail!(ErrorKind::ConfigurationInvalid(
                "drive driver requires a root folder id or a base path".to_string()
            )),
        };
        Ok(Self::from_parts(api, root))
    }
}

impl<A: DriveApi> DriveProvider<A> {
    /// Provider anchored at a fixed folder id.
    pub fn with_api(api: A, root_folder_id: impl Into<String>) -> Self {
        Self::from_parts(api, RootSpec::FolderId(root_folder_id.into()))
    }

    /// Provider anchored at a named folder chain under the implicit root.
    pub fn with_base_folder(api: A, base_folder: impl Into<String>) -> Self {
        Self::from_parts(api, RootSpec::BaseFolder(base_folder.into()))
    }

    fn from_parts(api: A, root: RootSpec) -> Self {
        Self { api, root, resolved_root: OnceCell::new(), cache: FolderCache::default() }
    }

    #[cfg(test)]
    fn with_folder_ttl(mut self, ttl: Duration) -> Self {
        self.cache = FolderCache::new(ttl);
        self
    }

    /// The node id every logical path is resolved against, computed once.
    ///
    /// A configured folder id that does not resolve to a live folder is a
    /// configuration problem, not a per-path `NotFound`.
    async fn root_id(&self) -> Result<&str> {
        self.resolved_root
            .get_or_try_init(|| async {
                match &self.root {
                    RootSpec::FolderId(id) => {
                        let node = match self.api.get_node(id).await {
                            Ok(node) => node,
                            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => {
                                exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                                    "configured root folder `{id}` does not exist or is not shared with this account"
                                )))
                            },
                            Err(err) => return Err(err),
                        };
                        if !node.is_folder() || node.trashed {
                            exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                                "configured root `{id}` is not a usable folder"
                            )));
                        }
                        Ok(node.id)
                    },
                    RootSpec::BaseFolder(base) => {
                        let validated = validate_path(base)?;
                        let mut parent = IMPLICIT_ROOT.to_string();
                        for segment in validated.iter() {
                            let name = segment.to_string_lossy();
                            parent = match self.api.find_child(&parent, &name, true).await? {
                                Some(folder) => folder.id,
                                None => self.api.create_folder(&parent, &name).await?.id,
                            };
                        }
                        Ok(parent)
                    },
                }
            })
            .await
            .map(String::as_str)
    }

    /// Drop all cached folder ids, forcing fresh resolution.
    pub async fn invalidate_folder_cache(&self) {
        self.cache.invalidate().await;
    }

    /// Extract the node id from a `gdrive://<node-id>` reference.
    fn node_ref(path: &Path) -> Option<&str> {
        path.to_str().and_then(|s| s.strip_prefix(NODE_REF_SCHEME)).filter(|id| !id.is_empty())
    }

    fn node_token(node_id: &str) -> StoredPath {
        StoredPath::new(format!("{NODE_REF_SCHEME}{node_id}"))
    }

    /// Split a validated logical path into folder segments and a basename.
    fn split(path: &Path) -> Result<(Vec<String>, String)> {
        let validated = validate_path(path)?;
        let mut segments: Vec<String> =
            validated.iter().map(|part| part.to_string_lossy().into_owned()).collect();
        let name = segments.pop().ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
        Ok((segments, name))
    }

    /// Walk the folder chain from the root, consulting the cache per level.
    ///
    /// With `create` set, missing folders are created and the resolution
    /// never comes back `None`. Without it, the first missing level aborts
    /// the walk.
    async fn resolve_folder(&self, segments: &[String], create: bool) -> Result<Option<String>> {
        let mut parent = self.root_id().await?.to_string();
        for segment in segments {
            if let Some(cached) = self.cache.get(&parent, segment).await {
                parent = cached;
                continue;
            }
            let node_id = match self.api.find_child(&parent, segment, true).await? {
                Some(node) => node.id,
                None if create => self.api.create_folder(&parent, segment).await?.id,
                None => return Ok(None),
            };
            self.cache.insert(parent.as_str(), segment.as_str(), node_id.as_str()).await;
            parent = node_id;
        }
        Ok(Some(parent))
    }

    /// Resolve a path or node reference to a live (non-trashed) node.
    async fn resolve(&self, path: &Path) -> Result<Option<DriveNode>> {
        if let Some(node_id) = Self::node_ref(path) {
            return match self.api.get_node(node_id).await {
                Ok(node) if node.trashed => Ok(None),
                Ok(node) => Ok(Some(node)),
                Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            };
        }
        let (folders, name) = Self::split(path)?;
        let Some(parent) = self.resolve_folder(&folders, false).await? else {
            return Ok(None);
        };
        Ok(self.api.find_child(&parent, &name, false).await?.filter(|node| !node.trashed))
    }

    async fn require(&self, path: &Path) -> Result<DriveNode> {
        self.resolve(path).await?.ok_or_raise(|| ErrorKind::NotFound(path.to_path_buf()))
    }

    /// Display path for metadata: node references only know their basename.
    fn display_path(path: &Path, node: &DriveNode) -> PathBuf {
        match Self::node_ref(path) {
            Some(_) => PathBuf::from(&node.name),
            None => path.to_path_buf(),
        }
    }

    fn node_metadata(path: &Path, node: &DriveNode) -> FileMetadata {
        let display = Self::display_path(path, node);
        if node.is_folder() {
            FileMetadata::directory(display)
        } else {
            FileMetadata::file(display, node.size)
                .with_mime_type(Some(node.mime_type.clone()))
                .with_last_modified(node.modified_time)
        }
    }

    async fn put_bytes(&self, path: &Path, data: Vec<u8>, options: &PutOptions) -> Result<StoredPath> {
        let content_type = options.content_type.as_deref();
        // A node reference means "replace this exact node's content".
        if let Some(node_id) = Self::node_ref(path) {
            let node = self.api.update_content(node_id, data, content_type).await?;
            return Ok(Self::node_token(&node.id));
        }
        let (folders, name) = Self::split(path)?;
        let parent = self
            .resolve_folder(&folders, true)
            .await?
            .ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
        let node = match self.api.find_child(&parent, &name, false).await? {
            // Overwrite in place so persisted node tokens stay valid.
            Some(existing) => self.api.update_content(&existing.id, data, content_type).await?,
            None => self.api.upload(&parent, &name, data, content_type).await?,
        };
        Ok(Self::node_token(&node.id))
    }
}

#[async_trait]
impl<A: DriveApi> StorageProvider for DriveProvider<A> {
    fn name(&self) -> &str {
        "drive"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::FailLoud
    }

    async fn put(&self, path: &Path, data: &[u8], options: &PutOptions) -> Result<StoredPath> {
        self.put_bytes(path, data.to_vec(), options).await
    }

    async fn put_stream(&self, path: &Path, mut reader: ByteSource, options: &PutOptions) -> Result<StoredPath> {
        // The multipart upload endpoint wants the whole body; resumable
        // upload sessions would lift this.
        // TODO: use `uploadType=resumable` with chunked transfer for bodies
        //       over the multipart limit.
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
        self.put_bytes(path, buffer, options).await
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let mut stream = self.get_stream(path).await?;
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
        Ok(buffer)
    }

    async fn get_stream(&self, path: &Path) -> Result<ByteSource> {
        let node = self.require(path).await?;
        self.api.download(&node.id).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve(path).await?.is_some())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // Absent is a no-op, but a live node that fails to delete propagates:
        // it would otherwise linger in the user's drive view.
        match self.resolve(path).await? {
            None => Ok(()),
            Some(node) => self.api.delete_node(&node.id).await,
        }
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let source_node = self.require(source).await?;
        let (folders, name) = Self::split(destination)?;
        let parent = self
            .resolve_folder(&folders, true)
            .await?
            .ok_or_raise(|| ErrorKind::InvalidPath(destination.to_path_buf()))?;
        let existing = self.api.find_child(&parent, &name, false).await?;
        let copied = self.api.copy_node(&source_node.id, &parent, &name).await?;
        // Remove the node the copy displaced; duplicate names are legal on
        // the drive, so this is how "overwrite" is spelled.
        if let Some(old) = existing.filter(|old| old.id != copied.id) {
            self.api.delete_node(&old.id).await?;
        }
        Ok(())
    }

    async fn rename(&self, source: &Path, destination: &Path) -> Result<()> {
        let source_node = self.require(source).await?;
        let (folders, name) = Self::split(destination)?;
        let parent = self
            .resolve_folder(&folders, true)
            .await?
            .ok_or_raise(|| ErrorKind::InvalidPath(destination.to_path_buf()))?;
        if let Some(existing) = self.api.find_child(&parent, &name, false).await? {
            if existing.id != source_node.id {
                self.api.delete_node(&existing.id).await?;
            }
        }
        let new_name = (name != source_node.name).then_some(name.as_str());
        // Metadata-only move: content never transfers, the node id survives.
        // The full parent set goes along so a multi-parented node stops
        // appearing under every old folder.
        self.api.move_node(&source_node.id, &source_node.parents, &parent, new_name).await?;
        Ok(())
    }

    async fn url(&self, path: &Path) -> Result<String> {
        let node = self.require(path).await?;
        Ok(node
            .web_view_link
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", node.id)))
    }

    async fn signed_url(&self, path: &Path, expires_in: Duration) -> Result<String> {
        // The drive cannot mint scoped expiring credentials; the best
        // available link still requires an authenticated session.
        debug!(expires_in = ?expires_in, "drive links cannot carry an expiry; returning download link");
        let node = self.require(path).await?;
        Ok(node
            .web_content_link
            .unwrap_or_else(|| format!("https://drive.google.com/uc?id={}&export=download", node.id)))
    }

    async fn stat(&self, path: &Path) -> Result<FileMetadata> {
        let node = self.require(path).await?;
        Ok(Self::node_metadata(path, &node))
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileMetadata>> {
        let (parent_id, base) = match prefix {
            None => (self.root_id().await?.to_string(), PathBuf::new()),
            Some(path) => {
                if let Some(node_id) = Self::node_ref(path) {
                    (node_id.to_string(), PathBuf::new())
                } else {
                    let validated = validate_path(path)?;
                    let segments: Vec<String> =
                        validated.iter().map(|part| part.to_string_lossy().into_owned()).collect();
                    match self.resolve_folder(&segments, false).await? {
                        Some(id) => (id, validated),
                        // Missing folder lists as empty, same as the other backends.
                        None => return Ok(Vec::new()),
                    }
                }
            },
        };
        let children = self.api.list_children(&parent_id).await?;
        Ok(children
            .iter()
            .filter(|node| !node.trashed)
            .map(|node| {
                let child_path = base.join(&node.name);
                Self::node_metadata(&child_path, node)
            })
            .collect())
    }

    async fn make_directory(&self, path: &Path) -> Result<()> {
        let validated = validate_path(path)?;
        let segments: Vec<String> = validated.iter().map(|part| part.to_string_lossy().into_owned()).collect();
        self.resolve_folder(&segments, true).await?;
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionReport {
        let email = match self.api.account_email().await {
            Ok(email) => email,
            Err(err) => return ConnectionReport::failed(format!("drive authentication failed: {err}")),
        };
        let root_id = match self.root_id().await {
            Ok(id) => id,
            Err(err) => return ConnectionReport::failed(err.to_string()),
        };
        match self.api.get_node(root_id).await {
            Ok(root) => {
                ConnectionReport::ok(format!("authenticated as {email}; root folder `{}`", root.name))
            },
            Err(err) => ConnectionReport::failed(format!("could not reach root folder: {err}")),
        }
    }
}
