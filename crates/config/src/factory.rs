//! Provider factory with a short-lived instance cache.
//!
//! Building a provider is cheap but not free (S3 client setup, config
//! validation), and the settings rows only change when an operator edits
//! them. The factory keeps the last built provider and reuses it while the
//! resolved config is unchanged and the entry is younger than
//! [`DEFAULT_CACHE_TTL`]. The cache is in-process only; a multi-process
//! deployment leans on the TTL, not on cross-process invalidation.

use crate::error::{ErrorKind, Result};
use crate::model::{StorageConfig, StorageDriver};
use exn::{OptionExt, ResultExt};
use fieldops_db::SettingsRepository;
use fieldops_storage::ProviderHandle;
use fieldops_storage::backend::{DriveProvider, LocalProvider, ObjectStoreProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// How long a cached provider is reused before the settings are re-checked.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedProvider {
    config: StorageConfig,
    provider: ProviderHandle,
    built_at: Instant,
}

/// Builds [`StorageProvider`](fieldops_storage::StorageProvider) instances
/// from the persisted configuration.
pub struct ProviderFactory {
    settings: SettingsRepository,
    ttl: Duration,
    cache: Mutex<Option<CachedProvider>>,
}

impl ProviderFactory {
    pub fn new(settings: SettingsRepository) -> Self {
        Self { settings, ttl: DEFAULT_CACHE_TTL, cache: Mutex::new(None) }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The provider for the current configuration, cached.
    ///
    /// The settings rows are always re-read; the expensive part that the
    /// cache skips is provider construction. Comparing the whole resolved
    /// config means any field edit (driver, bucket, credentials) produces a
    /// fresh instance even within the TTL.
    pub async fn provider(&self) -> Result<ProviderHandle> {
        let config = StorageConfig::from_settings(&self.settings).await?;
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.built_at.elapsed() < self.ttl && cached.config == config {
                return Ok(Arc::clone(&cached.provider));
            }
        }
        debug!(driver = %config.driver, "building storage provider");
        let provider = Self::build(&config)?;
        *cache = Some(CachedProvider { config, provider: Arc::clone(&provider), built_at: Instant::now() });
        Ok(provider)
    }

    /// Drop the cached instance. Called after persisting configuration
    /// changes so the next request rebuilds immediately instead of waiting
    /// out the TTL.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Build an uncached provider for a candidate configuration.
    ///
    /// Used to run `test_connection` against settings the operator has not
    /// saved yet; never touches the cache in either direction.
    pub fn test_instance(config: &StorageConfig) -> Result<ProviderHandle> {
        Self::build(config)
    }

    fn build(config: &StorageConfig) -> Result<ProviderHandle> {
        let provider: ProviderHandle = match config.driver {
            StorageDriver::Local => {
                let base_path = config
                    .base_path
                    .as_deref()
                    .ok_or_raise(|| ErrorKind::ConfigurationInvalid(missing("storage_base_path")))?;
                Arc::new(
                    LocalProvider::new(base_path)
                        .or_raise(|| ErrorKind::ConfigurationInvalid(rejected(config.driver)))?,
                )
            },
            StorageDriver::ObjectStore => {
                let bucket = config
                    .s3_bucket
                    .as_deref()
                    .ok_or_raise(|| ErrorKind::ConfigurationInvalid(missing("storage_s3_bucket")))?;
                let region = config
                    .s3_region
                    .as_deref()
                    .ok_or_raise(|| ErrorKind::ConfigurationInvalid(missing("storage_s3_region")))?;
                let key_id = config
                    .s3_access_key_id
                    .as_deref()
                    .ok_or_raise(|| ErrorKind::ConfigurationInvalid(missing("storage_s3_access_key_id")))?;
                let key_secret = config
                    .s3_secret_access_key
                    .as_deref()
                    .ok_or_raise(|| ErrorKind::ConfigurationInvalid(missing("storage_s3_secret_access_key")))?;
                Arc::new(
                    ObjectStoreProvider::new(
                        bucket,
                        config.base_path.clone(),
                        region,
                        config.s3_endpoint.clone(),
                        key_id,
                        key_secret,
                    )
                    .or_raise(|| ErrorKind::ConfigurationInvalid(rejected(config.driver)))?,
                )
            },
            StorageDriver::HierarchicalDrive => {
                let token = config.google_drive_access_token.as_deref().ok_or_raise(|| {
                    ErrorKind::ConfigurationInvalid(missing("storage_google_drive_access_token"))
                })?;
                // A fixed root folder id takes precedence; without one the
                // provider anchors at a folder named after the base path
                // under the drive's implicit root.
                if config.google_drive_folder_id.is_none() && config.base_path.is_none() {
                    exn::bail!(ErrorKind::ConfigurationInvalid(
                        "set `storage_google_drive_folder_id` or `storage_base_path` for the google_drive driver"
                            .to_string()
                    ));
                }
                Arc::new(
                    DriveProvider::new(
                        token,
                        config.google_drive_folder_id.as_deref(),
                        config.base_path.as_deref(),
                    )
                    .or_raise(|| ErrorKind::ConfigurationInvalid(rejected(config.driver)))?,
                )
            },
        };
        Ok(provider)
    }
}

fn missing(key: &str) -> String {
    format!("required setting `{key}` is not set")
}

fn rejected(driver: StorageDriver) -> String {
    format!("`{driver}` driver rejected its configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_db::Database;
    use fieldops_storage::StorageProvider;

    async fn local_setup() -> (Database, ProviderFactory, tempfile::TempDir) {
        let db = Database::connect_in_memory().await.unwrap();
        let settings = SettingsRepository::from(&db);
        let dir = tempfile::tempdir().unwrap();
        settings.set("storage_driver", "local").await.unwrap();
        settings.set("storage_base_path", dir.path().to_str().unwrap()).await.unwrap();
        (db, ProviderFactory::new(settings), dir)
    }

    #[tokio::test]
    async fn test_same_config_reuses_instance() {
        let (db, factory, _dir) = local_setup().await;
        let first = factory.provider().await.unwrap();
        let second = factory.provider().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        db.close().await;
    }

    #[tokio::test]
    async fn test_config_change_rebuilds() {
        let (db, factory, _dir) = local_setup().await;
        let first = factory.provider().await.unwrap();
        let other_dir = tempfile::tempdir().unwrap();
        factory.settings.set("storage_base_path", other_dir.path().to_str().unwrap()).await.unwrap();
        let second = factory.provider().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second), "changed base path must rebuild within the TTL");
        db.close().await;
    }

    #[tokio::test]
    async fn test_expired_ttl_rebuilds() {
        let (db, factory, _dir) = local_setup().await;
        let factory = factory.with_ttl(Duration::ZERO);
        let first = factory.provider().await.unwrap();
        let second = factory.provider().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        db.close().await;
    }

    #[tokio::test]
    async fn test_invalidate_rebuilds() {
        let (db, factory, _dir) = local_setup().await;
        let first = factory.provider().await.unwrap();
        factory.invalidate().await;
        let second = factory.provider().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        db.close().await;
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let db = Database::connect_in_memory().await.unwrap();
        let settings = SettingsRepository::from(&db);
        settings.set("storage_driver", "s3").await.unwrap();
        settings.set("storage_s3_bucket", "field-docs").await.unwrap();
        let factory = ProviderFactory::new(settings);
        let err = factory.provider().await.map(|_| ()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ConfigurationInvalid(msg) if msg.contains("storage_s3_region")));
        db.close().await;
    }

    #[test]
    fn test_drive_without_fixed_root_uses_base_path() {
        let config = StorageConfig {
            driver: StorageDriver::HierarchicalDrive,
            base_path: Some("FieldOps Files".to_string()),
            google_drive_access_token: Some("ya29.token".to_string()),
            ..StorageConfig::default()
        };
        // Root resolution is lazy, so construction succeeds without a
        // folder id; the base-path folder is found or created on first use.
        let provider = ProviderFactory::test_instance(&config).unwrap();
        assert_eq!(provider.name(), "drive");
    }

    #[test]
    fn test_drive_requires_root_or_base_path() {
        let config = StorageConfig {
            driver: StorageDriver::HierarchicalDrive,
            google_drive_access_token: Some("ya29.token".to_string()),
            ..StorageConfig::default()
        };
        let err = ProviderFactory::test_instance(&config).map(|_| ()).unwrap_err();
        assert!(
            matches!(&*err, ErrorKind::ConfigurationInvalid(msg) if msg.contains("storage_google_drive_folder_id")),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn test_test_instance_bypasses_cache() {
        let (db, factory, dir) = local_setup().await;
        let cached = factory.provider().await.unwrap();
        let config = StorageConfig {
            driver: StorageDriver::Local,
            base_path: Some(dir.path().to_str().unwrap().to_string()),
            ..StorageConfig::default()
        };
        let candidate = ProviderFactory::test_instance(&config).unwrap();
        assert!(!Arc::ptr_eq(&cached, &candidate));
        // The cached entry is untouched.
        let again = factory.provider().await.unwrap();
        assert!(Arc::ptr_eq(&cached, &again));
        db.close().await;
    }
}
