//! S3-compatible object storage provider.
//!
//! Works against AWS S3 and S3-compatible services (Backblaze B2, MinIO,
//! Tigris, etc.). Credentials are provided explicitly via the persisted
//! storage configuration; an optional custom endpoint switches the client
//! into path-style addressing for non-AWS services.
//!
//! There is no public/anonymous URL path by default: [`url`] always
//! delegates to [`signed_url`].
//!
//! [`url`]: StorageProvider::url
//! [`signed_url`]: StorageProvider::signed_url

use crate::backend::{
    ByteSource, ConnectionReport, DEFAULT_SIGNED_URL_TTL, DeletePolicy, PutOptions, StorageProvider, StoredPath,
    Visibility,
};
use crate::error::{ErrorKind, Result};
use crate::file::FileMetadata;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime},
    types::ObjectCannedAcl,
};
use exn::OptionExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::UtcDateTime;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// S3-compatible object storage provider.
///
/// Stores files in a bucket, under an optional key prefix acting as the
/// logical base path. All logical paths are relative to that prefix.
#[derive(Debug, Clone)]
pub struct ObjectStoreProvider {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl ObjectStoreProvider {
    /// Create a new object storage provider.
    ///
    /// # Arguments
    /// * `bucket` - bucket name
    /// * `prefix` - optional key prefix (the logical base path)
    /// * `region` - AWS region or provider-specific region (e.g. "us-west-004" for Backblaze)
    /// * `endpoint` - custom endpoint URL for S3-compatible services
    /// * `key_id` / `key_secret` - access credentials
    ///
    /// # Errors
    /// Returns [`ErrorKind::ConfigurationInvalid`] when bucket, region, or
    /// either credential is blank. Connectivity is *not* probed here; that
    /// is what [`test_connection`](StorageProvider::test_connection) is for.
    pub fn new(
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        let region = region.into();
        let key_id = key_id.into();
        let key_secret = key_secret.into();
        for (field, value) in [
            ("bucket", &bucket),
            ("region", &region),
            ("access key id", &key_id),
            ("secret access key", &key_secret),
        ] {
            if value.trim().is_empty() {
                exn::bail!(ErrorKind::ConfigurationInvalid(format!(
                    "object-store driver requires a {field}"
                )));
            }
        }
        let prefix = prefix
            .filter(|p| !p.trim().is_empty())
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "fieldops-settings");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region))
            // Exponential backoff: 1 initial attempt + 3 retries
            .retry_config(RetryConfig::standard().with_max_attempts(4));
        // A custom endpoint means a non-default provider; those need
        // path-style addressing (bucket in the path, not the hostname).
        if let Some(endpoint_url) = endpoint.filter(|e| !e.trim().is_empty()) {
            config_builder = config_builder.endpoint_url(endpoint_url).force_path_style(true);
        }
        let client = Client::from_conf(config_builder.build());
        Ok(Self { client, bucket, prefix })
    }

    #[cfg(test)]
    fn from_parts(client: Client, bucket: impl Into<String>, prefix: Option<String>) -> Self {
        Self { client, bucket: bucket.into(), prefix }
    }

    /// Construct the full object key from a logical path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_string_lossy();
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
            None => path_str.into_owned(),
        })
    }

    /// Strip the configured prefix from an object key to get the logical path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => {
                let prefix_normalized = prefix.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        validate_path(relative)
    }

    /// Map an SDK error onto the uniform taxonomy instead of leaking the
    /// backend-specific shape to callers.
    fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, path: &Path) -> crate::error::Error
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let code = err.code().unwrap_or("unknown").to_string();
        let kind = match &err {
            SdkError::ServiceError(ctx) => match ctx.raw().status().as_u16() {
                404 => ErrorKind::NotFound(path.to_path_buf()),
                401 | 403 => ErrorKind::NotAuthorized(format!("object store rejected request ({code})")),
                status => ErrorKind::BackendUnavailable(format!("object store error {status} ({code})")),
            },
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                ErrorKind::BackendUnavailable(format!("object store unreachable: {err}"))
            },
            _ => ErrorKind::BackendUnavailable(format!("object store error: {err}")),
        };
        exn::Exn::from(kind)
    }

    fn parse_datetime(dt: &DateTime) -> Option<UtcDateTime> {
        UtcDateTime::from_unix_timestamp(dt.secs()).ok()
    }

    async fn put_object(&self, path: &Path, body: ByteStream, options: &PutOptions) -> Result<StoredPath> {
        let logical = validate_path(path)?;
        let key = self.full_key(path)?;
        let mut request = self.client.put_object().bucket(&self.bucket).key(&key).body(body);
        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        if let Some(visibility) = options.visibility {
            request = request.acl(match visibility {
                Visibility::Public => ObjectCannedAcl::PublicRead,
                Visibility::Private => ObjectCannedAcl::Private,
            });
        }
        request.send().await.map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(StoredPath::new(logical.to_string_lossy()))
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    fn name(&self) -> &str {
        "object-store"
    }

    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::BestEffort
    }

    async fn put(&self, path: &Path, data: &[u8], options: &PutOptions) -> Result<StoredPath> {
        self.put_object(path, ByteStream::from(data.to_vec()), options).await
    }

    async fn put_stream(&self, path: &Path, mut reader: ByteSource, options: &PutOptions) -> Result<StoredPath> {
        // PutObject wants a known content length up front, so the stream is
        // drained into memory before upload.
        // TODO: switch to CreateMultipartUpload/UploadPart for uploads over
        //       ~8MiB so large files don't get buffered here.
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
        self.put_object(path, ByteStream::from(buffer), options).await
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ErrorKind::BackendUnavailable(format!("download interrupted: {e}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn get_stream(&self, path: &Path) -> Result<ByteSource> {
        let key = self.full_key(path)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.full_key(path)?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(Self::map_sdk_error(err, path)),
        }
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        // DeleteObject succeeds on absent keys, so idempotence comes free;
        // anything else degrades to a warning per the best-effort policy.
        if let Err(err) = self.client.delete_object().bucket(&self.bucket).key(&key).send().await {
            warn!(path = %path.display(), error = %err, "best-effort delete failed");
        }
        Ok(())
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        let source_key = self.full_key(source)?;
        let destination_key = self.full_key(destination)?;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, source_key))
            .key(&destination_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, source))?;
        Ok(())
    }

    async fn rename(&self, source: &Path, destination: &Path) -> Result<()> {
        // No atomic rename on object stores: copy, then best-effort delete.
        self.copy(source, destination).await?;
        self.delete(source).await
    }

    async fn url(&self, path: &Path) -> Result<String> {
        // No anonymous access by default; every URL is signed.
        self.signed_url(path, DEFAULT_SIGNED_URL_TTL).await
    }

    async fn signed_url(&self, path: &Path, expires_in: Duration) -> Result<String> {
        let key = self.full_key(path)?;
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| ErrorKind::ConfigurationInvalid(format!("invalid signed URL expiry: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(config)
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(request.uri().to_string())
    }

    async fn stat(&self, path: &Path) -> Result<FileMetadata> {
        let logical = validate_path(path)?;
        let key = self.full_key(path)?;
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        let size = output.content_length().unwrap_or_default().max(0) as u64;
        Ok(FileMetadata::file(logical, size)
            .with_mime_type(output.content_type().map(str::to_string))
            .with_last_modified(output.last_modified().and_then(Self::parse_datetime)))
    }

    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileMetadata>> {
        let key_prefix = match prefix {
            Some(p) => format!("{}/", self.full_key(p)?),
            None => self.prefix.as_ref().map(|p| format!("{}/", p.trim_end_matches('/'))).unwrap_or_default(),
        };
        let fallback = PathBuf::from(key_prefix.trim_end_matches('/'));
        let mut results = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).delimiter("/");
            if !key_prefix.is_empty() {
                request = request.prefix(&key_prefix);
            }
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request.send().await.map_err(|e| Self::map_sdk_error(e, &fallback))?;
            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                // Zero-byte folder markers end in a slash; skip them.
                if key.ends_with('/') {
                    continue;
                }
                let relative = self.relative_path(key)?;
                let size = object.size().unwrap_or_default().max(0) as u64;
                results.push(
                    FileMetadata::file(relative, size)
                        .with_last_modified(object.last_modified().and_then(Self::parse_datetime)),
                );
            }
            for common in response.common_prefixes() {
                let Some(dir_key) = common.prefix() else { continue };
                let relative = self.relative_path(dir_key.trim_end_matches('/'))?;
                results.push(FileMetadata::directory(relative));
            }
            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(results)
    }

    async fn make_directory(&self, path: &Path) -> Result<()> {
        // Object stores have no directories; "directories" appear when keys
        // under them exist. Validate the path, otherwise a no-op.
        validate_path(path)?;
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionReport {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => ConnectionReport::ok(format!("connected to bucket `{}`", self.bucket)),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                ConnectionReport::failed(format!("bucket `{}` not found", self.bucket))
            },
            Err(err) => {
                let message = match &err {
                    SdkError::ServiceError(ctx) => match ctx.raw().status().as_u16() {
                        404 => format!("bucket `{}` not found", self.bucket),
                        401 | 403 => format!(
                            "access denied for bucket `{}`: check access key id and secret",
                            self.bucket
                        ),
                        status => format!("object store returned {status} for bucket `{}`", self.bucket),
                    },
                    SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                        format!("endpoint unreachable: {err}")
                    },
                    _ => format!("connection test failed: {err}"),
                };
                ConnectionReport::failed(message)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::head_bucket::HeadBucketError;
    use aws_sdk_s3::operation::head_object::HeadObjectError;
    use aws_smithy_mocks::{MockResponseInterceptor, Rule, RuleMode, create_mock_http_client, mock};
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;

    // Wired by hand rather than through `mock_client!`: the macro calls
    // SDK-version-specific test defaults, and this module must build against
    // the declared minimum SDK version.
    fn mock_client(rules: &[&Rule]) -> Client {
        let mut interceptor = MockResponseInterceptor::new().rule_mode(RuleMode::MatchAny);
        for rule in rules {
            interceptor = interceptor.with_rule(rule);
        }
        Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new("test-key", "test-secret", None, None, "mock"))
                .region(Region::new("us-east-1"))
                .retry_config(RetryConfig::disabled())
                .http_client(create_mock_http_client())
                .interceptor(interceptor)
                .build(),
        )
    }

    fn provider() -> ObjectStoreProvider {
        ObjectStoreProvider::new(
            "field-docs",
            Some("tenant-7".to_string()),
            "us-east-1",
            None,
            "key-id",
            "key-secret",
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_blank_required_fields() {
        let err = ObjectStoreProvider::new("", None, "us-east-1", None, "k", "s").unwrap_err();
        assert!(matches!(&*err, ErrorKind::ConfigurationInvalid(_)));
        assert!(ObjectStoreProvider::new("bucket", None, " ", None, "k", "s").is_err());
        assert!(ObjectStoreProvider::new("bucket", None, "region", None, "", "s").is_err());
        assert!(ObjectStoreProvider::new("bucket", None, "region", None, "k", "").is_err());
    }

    #[test]
    fn test_full_key_with_prefix() {
        let provider = provider();
        assert_eq!(provider.full_key(Path::new("projects/42/report.pdf")).unwrap(), "tenant-7/projects/42/report.pdf");
    }

    #[test]
    fn test_full_key_without_prefix() {
        let provider =
            ObjectStoreProvider::new("field-docs", None, "us-east-1", None, "key-id", "key-secret").unwrap();
        assert_eq!(provider.full_key(Path::new("projects/42/report.pdf")).unwrap(), "projects/42/report.pdf");
    }

    #[test]
    fn test_relative_path_strips_prefix() {
        let provider = provider();
        assert_eq!(
            provider.relative_path("tenant-7/projects/42/report.pdf").unwrap(),
            Path::new("projects/42/report.pdf")
        );
        // Keys outside the prefix are returned as-is rather than mangled.
        assert_eq!(provider.relative_path("other/key.pdf").unwrap(), Path::new("other/key.pdf"));
    }

    #[test]
    fn test_full_key_rejects_traversal() {
        let provider = provider();
        assert!(provider.full_key(Path::new("../outside")).is_err());
    }

    #[tokio::test]
    async fn test_connection_distinguishes_missing_bucket() {
        let rule = mock!(Client::head_bucket).then_error(|| {
            HeadBucketError::NotFound(aws_sdk_s3::types::error::NotFound::builder().build())
        });
        let client = mock_client(&[&rule]);
        let provider = ObjectStoreProvider::from_parts(client, "missing-bucket", None);
        let report = provider.test_connection().await;
        assert!(!report.success);
        assert!(report.message.contains("not found"), "got: {}", report.message);
    }

    #[tokio::test]
    async fn test_connection_distinguishes_access_denied() {
        let rule = mock!(Client::head_bucket).then_http_response(|| {
            HttpResponse::new(StatusCode::try_from(403).unwrap(), SdkBody::from("AccessDenied"))
        });
        let client = mock_client(&[&rule]);
        let provider = ObjectStoreProvider::from_parts(client, "locked-bucket", None);
        let report = provider.test_connection().await;
        assert!(!report.success);
        assert!(report.message.contains("access denied"), "got: {}", report.message);
    }

    #[tokio::test]
    async fn test_exists_false_on_missing_object() {
        let rule = mock!(Client::head_object).then_error(|| {
            HeadObjectError::NotFound(aws_sdk_s3::types::error::NotFound::builder().build())
        });
        let client = mock_client(&[&rule]);
        let provider = ObjectStoreProvider::from_parts(client, "field-docs", None);
        assert!(!provider.exists(Path::new("missing.pdf")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_best_effort() {
        let rule = mock!(Client::delete_object).then_http_response(|| {
            HttpResponse::new(StatusCode::try_from(500).unwrap(), SdkBody::from("InternalError"))
        });
        let client = mock_client(&[&rule]);
        let provider = ObjectStoreProvider::from_parts(client, "field-docs", None);
        // A backend failure is logged, not raised.
        provider.delete(Path::new("some/file.pdf")).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_returns_logical_path_token() {
        let rule = mock!(Client::put_object)
            .then_output(|| aws_sdk_s3::operation::put_object::PutObjectOutput::builder().build());
        let client = mock_client(&[&rule]);
        let provider = ObjectStoreProvider::from_parts(client, "field-docs", Some("tenant-7".to_string()));
        let token =
            provider.put(Path::new("projects/42/a.pdf"), b"data", &PutOptions::default()).await.unwrap();
        // The token is the logical path, not the prefixed object key.
        assert_eq!(token.as_str(), "projects/42/a.pdf");
    }
}
