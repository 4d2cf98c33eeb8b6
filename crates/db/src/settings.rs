//! Repository for persisted key/value settings.
//!
//! Storage configuration lives here as flat `storage_*` keys, edited by the
//! application's admin surface and read by the provider factory. All methods
//! operate on the global scope (`owner IS NULL`); tenant-scoped rows belong
//! to the surrounding application.

use crate::Database;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::collections::HashMap;
use time::UtcDateTime;

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl From<&Database> for SettingsRepository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a single global setting. Absent keys are `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ? AND owner IS NULL")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Fetch a setting that must exist.
    pub async fn get_required(&self, key: &str) -> Result<String> {
        self.get(key).await?.ok_or_raise(|| ErrorKind::SettingNotFound(key.to_string()))
    }

    /// Fetch every global setting whose key starts with `prefix`, as a map.
    pub async fn get_all(&self, prefix: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings WHERE key LIKE ? || '%' AND owner IS NULL")
                .bind(prefix)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().collect())
    }

    /// Insert or replace a global setting.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = UtcDateTime::now().unix_timestamp();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        // The uniqueness index is over an expression, which SQLite's upsert
        // clause can't target; update-then-insert inside the transaction
        // covers both cases.
        let updated = sqlx::query("UPDATE settings SET value = ?, updated_at = ? WHERE key = ? AND owner IS NULL")
            .bind(value)
            .bind(now)
            .bind(key)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO settings (key, value, owner, updated_at) VALUES (?, ?, NULL, ?)")
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> (Database, SettingsRepository) {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = SettingsRepository::from(&db);
        (db, repo)
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let (db, repo) = repo().await;
        assert_eq!(repo.get("storage_driver").await.unwrap(), None);
        let err = repo.get_required("storage_driver").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SettingNotFound(_)));
        db.close().await;
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (db, repo) = repo().await;
        repo.set("storage_driver", "local").await.unwrap();
        assert_eq!(repo.get("storage_driver").await.unwrap().as_deref(), Some("local"));
        db.close().await;
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let (db, repo) = repo().await;
        repo.set("storage_driver", "local").await.unwrap();
        repo.set("storage_driver", "s3").await.unwrap();
        assert_eq!(repo.get("storage_driver").await.unwrap().as_deref(), Some("s3"));
        db.close().await;
    }

    #[tokio::test]
    async fn test_get_all_by_prefix() {
        let (db, repo) = repo().await;
        repo.set("storage_driver", "s3").await.unwrap();
        repo.set("storage_s3_bucket", "field-docs").await.unwrap();
        repo.set("smtp_host", "mail.example.com").await.unwrap();
        let storage = repo.get_all("storage_").await.unwrap();
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get("storage_s3_bucket").map(String::as_str), Some("field-docs"));
        assert!(!storage.contains_key("smtp_host"));
        db.close().await;
    }
}
