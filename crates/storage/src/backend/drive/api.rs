//! Node-level client for the hierarchical drive's HTTP API.
//!
//! The provider in the parent module works purely in terms of [`DriveApi`]
//! so that path resolution, caching, and overwrite semantics can be tested
//! without network access. [`GoogleDriveApi`] is the real implementation,
//! speaking Drive API v3 with a bearer token.

use crate::backend::ByteSource;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Response, multipart};
use serde::Deserialize;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::UtcDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::io::StreamReader;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const NODE_FIELDS: &str = "id,name,mimeType,size,trashed,modifiedTime,webViewLink,webContentLink,parents";

/// A file or folder node in the drive hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveNode {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub trashed: bool,
    pub modified_time: Option<UtcDateTime>,
    pub web_view_link: Option<String>,
    pub web_content_link: Option<String>,
    pub parents: Vec<String>,
}

impl DriveNode {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

/// Node-level drive operations.
///
/// Everything here addresses nodes by identifier; translating logical paths
/// into identifiers is the provider's job, not the API client's.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Find a direct, non-trashed child of `parent_id` by exact name.
    async fn find_child(&self, parent_id: &str, name: &str, folders_only: bool) -> Result<Option<DriveNode>>;

    /// Create a folder under `parent_id`.
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveNode>;

    /// Upload a new file under `parent_id`.
    async fn upload(&self, parent_id: &str, name: &str, data: Vec<u8>, content_type: Option<&str>)
    -> Result<DriveNode>;

    /// Replace the content of an existing file, keeping its identifier.
    async fn update_content(&self, node_id: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<DriveNode>;

    /// Fetch a node's metadata by identifier.
    async fn get_node(&self, node_id: &str) -> Result<DriveNode>;

    /// Stream a file node's content.
    async fn download(&self, node_id: &str) -> Result<ByteSource>;

    /// Permanently delete a node.
    async fn delete_node(&self, node_id: &str) -> Result<()>;

    /// Server-side copy of a file node into `parent_id` under `name`.
    async fn copy_node(&self, node_id: &str, parent_id: &str, name: &str) -> Result<DriveNode>;

    /// Re-parent a node, optionally renaming it in the same call. Every
    /// previous parent is removed so the node stops appearing under its old
    /// folders, even when it had several.
    async fn move_node(
        &self,
        node_id: &str,
        previous_parents: &[String],
        to_parent: &str,
        new_name: Option<&str>,
    ) -> Result<DriveNode>;

    /// List all direct, non-trashed children of a folder.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<DriveNode>>;

    /// The email address the current credentials authenticate as.
    async fn account_email(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    id: String,
    name: String,
    mime_type: String,
    // Drive serializes int64 fields as JSON strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    trashed: bool,
    #[serde(default)]
    modified_time: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    web_content_link: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

impl From<FileResource> for DriveNode {
    fn from(resource: FileResource) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            mime_type: resource.mime_type,
            size: resource.size.and_then(|s| s.parse().ok()).unwrap_or_default(),
            trashed: resource.trashed,
            modified_time: resource
                .modified_time
                .and_then(|ts| OffsetDateTime::parse(&ts, &Rfc3339).ok())
                .map(OffsetDateTime::to_utc),
            web_view_link: resource.web_view_link,
            web_content_link: resource.web_content_link,
            parents: resource.parents,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileResource>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct About {
    user: AboutUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutUser {
    email_address: String,
}

/// Drive API v3 client authenticated with an OAuth2 bearer token.
pub struct GoogleDriveApi {
    http: reqwest::Client,
    access_token: String,
}

impl GoogleDriveApi {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            exn::bail!(ErrorKind::ConfigurationInvalid("drive driver requires an access token".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ErrorKind::BackendUnavailable(format!("failed to build http client: {e}")))?;
        Ok(Self { http, access_token })
    }

    fn transport_error(err: reqwest::Error) -> crate::error::Error {
        exn::Exn::from(ErrorKind::BackendUnavailable(format!("drive unreachable: {err}")))
    }

    /// Translate a non-2xx response into the uniform taxonomy, reading the
    /// body for the operator-facing message.
    async fn check(response: Response, context: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let kind = match status.as_u16() {
            404 => ErrorKind::NotFound(PathBuf::from(context)),
            401 | 403 => ErrorKind::NotAuthorized(format!("drive rejected {context}: {status}")),
            code => ErrorKind::BackendUnavailable(format!("drive error {code} on {context}: {body}")),
        };
        Err(exn::Exn::from(kind))
    }

    async fn parse_node(response: Response, context: &str) -> Result<DriveNode> {
        let resource: FileResource = Self::check(response, context)
            .await?
            .json()
            .await
            .map_err(|e| ErrorKind::BackendUnavailable(format!("malformed drive response: {e}")))?;
        Ok(resource.into())
    }

    /// Escape a literal for use inside a `files.list` query string.
    fn escape_query(value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "\\'")
    }

    async fn search(&self, query: &str, page_token: Option<&str>) -> Result<FileList> {
        let fields = format!("nextPageToken,files({NODE_FIELDS})");
        let mut request = self
            .http
            .get(format!("{API_BASE}/files"))
            .bearer_auth(&self.access_token)
            .query(&[("q", query), ("fields", fields.as_str()), ("pageSize", "1000"), ("spaces", "drive")]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        let response = request.send().await.map_err(Self::transport_error)?;
        let list: FileList = Self::check(response, "files.list")
            .await?
            .json()
            .await
            .map_err(|e| ErrorKind::BackendUnavailable(format!("malformed drive response: {e}")))?;
        Ok(list)
    }
}

#[async_trait]
impl DriveApi for GoogleDriveApi {
    async fn find_child(&self, parent_id: &str, name: &str, folders_only: bool) -> Result<Option<DriveNode>> {
        let mut query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            Self::escape_query(parent_id),
            Self::escape_query(name),
        );
        if folders_only {
            query.push_str(&format!(" and mimeType = '{FOLDER_MIME}'"));
        }
        let list = self.search(&query, None).await?;
        Ok(list.files.into_iter().next().map(DriveNode::from))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveNode> {
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
        });
        let response = self
            .http
            .post(format!("{API_BASE}/files"))
            .bearer_auth(&self.access_token)
            .query(&[("fields", NODE_FIELDS)])
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::parse_node(response, name).await
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<DriveNode> {
        let metadata = serde_json::json!({ "name": name, "parents": [parent_id] });
        let metadata_part = multipart::Part::text(metadata.to_string())
            .mime_str("application/json; charset=UTF-8")
            .map_err(Self::transport_error)?;
        let mut media_part = multipart::Part::bytes(data);
        if let Some(mime) = content_type {
            media_part = media_part
                .mime_str(mime)
                .map_err(|e| ErrorKind::ConfigurationInvalid(format!("invalid content type `{mime}`: {e}")))?;
        }
        let form = multipart::Form::new().part("metadata", metadata_part).part("media", media_part);
        let response = self
            .http
            .post(format!("{UPLOAD_BASE}/files"))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", NODE_FIELDS)])
            .multipart(form)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::parse_node(response, name).await
    }

    async fn update_content(&self, node_id: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<DriveNode> {
        let mut request = self
            .http
            .patch(format!("{UPLOAD_BASE}/files/{node_id}"))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "media"), ("fields", NODE_FIELDS)])
            .body(data);
        if let Some(mime) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, mime);
        }
        let response = request.send().await.map_err(Self::transport_error)?;
        Self::parse_node(response, node_id).await
    }

    async fn get_node(&self, node_id: &str) -> Result<DriveNode> {
        let response = self
            .http
            .get(format!("{API_BASE}/files/{node_id}"))
            .bearer_auth(&self.access_token)
            .query(&[("fields", NODE_FIELDS)])
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::parse_node(response, node_id).await
    }

    async fn download(&self, node_id: &str) -> Result<ByteSource> {
        let response = self
            .http
            .get(format!("{API_BASE}/files/{node_id}"))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(Self::transport_error)?;
        let response = Self::check(response, node_id).await?;
        let stream = response.bytes_stream().map_err(|e| IoError::new(IoErrorKind::Other, e));
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{API_BASE}/files/{node_id}"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::check(response, node_id).await?;
        Ok(())
    }

    async fn copy_node(&self, node_id: &str, parent_id: &str, name: &str) -> Result<DriveNode> {
        let body = serde_json::json!({ "name": name, "parents": [parent_id] });
        let response = self
            .http
            .post(format!("{API_BASE}/files/{node_id}/copy"))
            .bearer_auth(&self.access_token)
            .query(&[("fields", NODE_FIELDS)])
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::parse_node(response, node_id).await
    }

    async fn move_node(
        &self,
        node_id: &str,
        previous_parents: &[String],
        to_parent: &str,
        new_name: Option<&str>,
    ) -> Result<DriveNode> {
        let body = match new_name {
            Some(name) => serde_json::json!({ "name": name }),
            None => serde_json::json!({}),
        };
        // `removeParents` takes a comma-separated id list.
        let remove = previous_parents.join(",");
        let mut request = self
            .http
            .patch(format!("{API_BASE}/files/{node_id}"))
            .bearer_auth(&self.access_token)
            .query(&[("addParents", to_parent), ("fields", NODE_FIELDS)]);
        if !remove.is_empty() {
            request = request.query(&[("removeParents", remove.as_str())]);
        }
        let response = request.json(&body).send().await.map_err(Self::transport_error)?;
        Self::parse_node(response, node_id).await
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<DriveNode>> {
        let query = format!("'{}' in parents and trashed = false", Self::escape_query(parent_id));
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let list = self.search(&query, page_token.as_deref()).await?;
            nodes.extend(list.files.into_iter().map(DriveNode::from));
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(nodes)
    }

    async fn account_email(&self) -> Result<String> {
        let response = self
            .http
            .get(format!("{API_BASE}/about"))
            .bearer_auth(&self.access_token)
            .query(&[("fields", "user(emailAddress)")])
            .send()
            .await
            .map_err(Self::transport_error)?;
        let about: About = Self::check(response, "about")
            .await?
            .json()
            .await
            .map_err(|e| ErrorKind::BackendUnavailable(format!("malformed drive response: {e}")))?;
        Ok(about.user.email_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query_quotes() {
        assert_eq!(GoogleDriveApi::escape_query("o'brien"), "o\\'brien");
        assert_eq!(GoogleDriveApi::escape_query("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_file_resource_parses_string_size() {
        let json = r#"{
            "id": "abc123",
            "name": "report.pdf",
            "mimeType": "application/pdf",
            "size": "2048",
            "modifiedTime": "2026-03-14T09:26:53Z",
            "webViewLink": "https://drive.google.com/file/d/abc123/view",
            "parents": ["root456"]
        }"#;
        let node: DriveNode = serde_json::from_str::<FileResource>(json).unwrap().into();
        assert_eq!(node.id, "abc123");
        assert_eq!(node.size, 2048);
        assert!(!node.is_folder());
        assert!(!node.trashed);
        assert_eq!(node.modified_time.unwrap().year(), 2026);
        assert_eq!(node.parents, vec!["root456".to_string()]);
    }

    #[test]
    fn test_folder_resource() {
        let json = r#"{"id": "f1", "name": "Projects", "mimeType": "application/vnd.google-apps.folder"}"#;
        let node: DriveNode = serde_json::from_str::<FileResource>(json).unwrap().into();
        assert!(node.is_folder());
        assert_eq!(node.size, 0);
    }

    #[test]
    fn test_new_rejects_blank_token() {
        let err = GoogleDriveApi::new("  ").map(|_| ()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ConfigurationInvalid(_)));
    }
}
