//! Storage configuration model, resolved from persisted settings rows.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use fieldops_db::SettingsRepository;
use std::collections::HashMap;
use std::str::FromStr;

/// Which backend the deployment stores files on.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageDriver {
    #[default]
    #[display("local")]
    Local,
    #[display("s3")]
    ObjectStore,
    #[display("google_drive")]
    HierarchicalDrive,
}

impl FromStr for StorageDriver {
    type Err = crate::error::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::ObjectStore),
            "google_drive" => Ok(Self::HierarchicalDrive),
            other => Err(exn::Exn::from(ErrorKind::ConfigurationInvalid(format!(
                "unknown storage driver `{other}`"
            )))),
        }
    }
}

/// One resolved snapshot of the `storage_*` settings.
///
/// Carries every backend's fields regardless of the selected driver; fields
/// irrelevant to the driver are simply ignored, never validated against the
/// wrong driver's rules. Validation of *required* fields happens when the
/// factory constructs the provider. The derived `PartialEq` is what the
/// factory's cache compares, so a credential edit under an unchanged driver
/// still invalidates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageConfig {
    pub driver: StorageDriver,
    pub base_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_endpoint: Option<String>,
    pub google_drive_folder_id: Option<String>,
    pub google_drive_access_token: Option<String>,
}

impl StorageConfig {
    /// Read the current `storage_*` rows. Absent driver means local.
    pub async fn from_settings(settings: &SettingsRepository) -> Result<Self> {
        let rows = settings.get_all("storage_").await.or_raise(|| ErrorKind::Settings)?;
        Self::from_rows(&rows)
    }

    fn from_rows(rows: &HashMap<String, String>) -> Result<Self> {
        let driver = match rows.get("storage_driver") {
            Some(value) => value.parse()?,
            None => StorageDriver::default(),
        };
        let field = |key: &str| rows.get(key).filter(|v| !v.trim().is_empty()).cloned();
        Ok(Self {
            driver,
            base_path: field("storage_base_path"),
            s3_bucket: field("storage_s3_bucket"),
            s3_region: field("storage_s3_region"),
            s3_access_key_id: field("storage_s3_access_key_id"),
            s3_secret_access_key: field("storage_s3_secret_access_key"),
            s3_endpoint: field("storage_s3_endpoint"),
            google_drive_folder_id: field("storage_google_drive_folder_id"),
            google_drive_access_token: field("storage_google_drive_access_token"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_driver_round_trip() {
        for driver in [StorageDriver::Local, StorageDriver::ObjectStore, StorageDriver::HierarchicalDrive] {
            assert_eq!(driver.to_string().parse::<StorageDriver>().unwrap(), driver);
        }
        assert!("dropbox".parse::<StorageDriver>().is_err());
    }

    #[test]
    fn test_absent_driver_defaults_to_local() {
        let config = StorageConfig::from_rows(&rows(&[])).unwrap();
        assert_eq!(config.driver, StorageDriver::Local);
    }

    #[test]
    fn test_irrelevant_fields_are_carried_not_validated() {
        // A local deployment with stale S3 rows left behind must still
        // resolve; the stale fields only matter for cache comparison.
        let config = StorageConfig::from_rows(&rows(&[
            ("storage_driver", "local"),
            ("storage_base_path", "/var/lib/fieldops/files"),
            ("storage_s3_bucket", "old-bucket"),
        ]))
        .unwrap();
        assert_eq!(config.driver, StorageDriver::Local);
        assert_eq!(config.s3_bucket.as_deref(), Some("old-bucket"));
    }

    #[test]
    fn test_blank_values_read_as_absent() {
        let config = StorageConfig::from_rows(&rows(&[("storage_s3_bucket", "   ")])).unwrap();
        assert_eq!(config.s3_bucket, None);
    }

    #[test]
    fn test_credential_change_breaks_equality() {
        let base = rows(&[("storage_driver", "s3"), ("storage_s3_access_key_id", "AKIA1")]);
        let mut changed = base.clone();
        changed.insert("storage_s3_access_key_id".to_string(), "AKIA2".to_string());
        assert_ne!(StorageConfig::from_rows(&base).unwrap(), StorageConfig::from_rows(&changed).unwrap());
    }
}
