//! Repository for the file migration ledger.
//!
//! Every legacy file the migration engine touches gets exactly one row,
//! keyed by `(entity_type, entity_id, source_path)`. The row's status is the
//! engine's source of truth for resumability: `completed` rows are never
//! re-copied, `failed` rows are retried on the next run.

use crate::Database;
use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use time::UtcDateTime;

/// Lifecycle of a single file migration.
///
/// `pending → in_progress → completed`, with `failed` reachable from any
/// non-terminal state. Stored as TEXT.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStatus {
    #[display("pending")]
    Pending,
    #[display("in_progress")]
    InProgress,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
}

impl FromStr for MigrationStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(exn::Exn::from(ErrorKind::InvalidData("migration status"))),
        }
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub source_path: String,
    pub destination_path: Option<String>,
    pub status: MigrationStatus,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub error_message: Option<String>,
    pub migrated_at: Option<UtcDateTime>,
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    entity_type: String,
    entity_id: Option<i64>,
    source_path: String,
    destination_path: Option<String>,
    status: String,
    file_size: Option<i64>,
    checksum: Option<String>,
    error_message: Option<String>,
    migrated_at: Option<i64>,
}

impl TryFrom<LedgerRow> for MigrationRecord {
    type Error = Error;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            source_path: row.source_path,
            destination_path: row.destination_path,
            status: row.status.parse()?,
            file_size: row
                .file_size
                .map(|size| u64::try_from(size).or_raise(|| ErrorKind::InvalidData("file size")))
                .transpose()?,
            checksum: row.checksum,
            error_message: row.error_message,
            migrated_at: row
                .migrated_at
                .map(|ts| {
                    UtcDateTime::from_unix_timestamp(ts).or_raise(|| ErrorKind::InvalidData("migration date"))
                })
                .transpose()?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, entity_type, entity_id, source_path, destination_path, \
                              status, file_size, checksum, error_message, migrated_at";

#[derive(Debug, Clone)]
pub struct MigrationLedger {
    pool: SqlitePool,
}

impl From<&Database> for MigrationLedger {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl MigrationLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up the ledger entry for one legacy file.
    pub async fn find(
        &self,
        entity_type: &str,
        entity_id: Option<i64>,
        source_path: &str,
    ) -> Result<Option<MigrationRecord>> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM file_migrations \
             WHERE entity_type = ? AND ifnull(entity_id, 0) = ifnull(?, 0) AND source_path = ?"
        ))
        .bind(entity_type)
        .bind(entity_id)
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        row.map(MigrationRecord::try_from).transpose()
    }

    /// Return the existing entry, or create a fresh `pending` one.
    ///
    /// Never resets an existing entry: a `completed` row coming back out of
    /// here is exactly how the engine skips already-migrated files.
    pub async fn upsert_pending(
        &self,
        entity_type: &str,
        entity_id: Option<i64>,
        source_path: &str,
    ) -> Result<MigrationRecord> {
        if let Some(existing) = self.find(entity_type, entity_id, source_path).await? {
            return Ok(existing);
        }
        sqlx::query("INSERT INTO file_migrations (entity_type, entity_id, source_path, status) VALUES (?, ?, ?, ?)")
            .bind(entity_type)
            .bind(entity_id)
            .bind(source_path)
            .bind(MigrationStatus::Pending.to_string())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.find(entity_type, entity_id, source_path)
            .await?
            .ok_or_else(|| exn::Exn::from(ErrorKind::RecordNotFound(source_path.to_string())))
    }

    /// Record that the copy for this entry has started.
    pub async fn mark_in_progress(&self, id: i64, destination_path: &str) -> Result<()> {
        self.update_status(id, MigrationStatus::InProgress, Some(destination_path), None, None, None).await
    }

    /// Record a finished migration with its verification data.
    pub async fn mark_completed(
        &self,
        id: i64,
        destination_path: &str,
        file_size: Option<u64>,
        checksum: Option<&str>,
    ) -> Result<()> {
        self.update_status(id, MigrationStatus::Completed, Some(destination_path), file_size, checksum, None)
            .await
    }

    /// Record a failure; the entry stays retryable on the next run.
    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<()> {
        self.update_status(id, MigrationStatus::Failed, None, None, None, Some(message)).await
    }

    async fn update_status(
        &self,
        id: i64,
        status: MigrationStatus,
        destination_path: Option<&str>,
        file_size: Option<u64>,
        checksum: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let migrated_at =
            (status == MigrationStatus::Completed).then(|| UtcDateTime::now().unix_timestamp());
        let file_size = file_size
            .map(|size| i64::try_from(size).or_raise(|| ErrorKind::InvalidData("file size")))
            .transpose()?;
        let result = sqlx::query(
            "UPDATE file_migrations SET \
                 status = ?, \
                 destination_path = coalesce(?, destination_path), \
                 file_size = coalesce(?, file_size), \
                 checksum = coalesce(?, checksum), \
                 error_message = ?, \
                 migrated_at = coalesce(?, migrated_at) \
             WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(destination_path)
        .bind(file_size)
        .bind(checksum)
        .bind(error_message)
        .bind(migrated_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::RecordNotFound(format!("ledger id {id}")));
        }
        Ok(())
    }

    /// Number of ledger entries per status.
    pub async fn counts_by_status(&self) -> Result<HashMap<MigrationStatus, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, count(*) FROM file_migrations GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|(status, count)| {
                Ok((status.parse()?, u64::try_from(count).or_raise(|| ErrorKind::InvalidData("count"))?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pending", MigrationStatus::Pending)]
    #[case("in_progress", MigrationStatus::InProgress)]
    #[case("completed", MigrationStatus::Completed)]
    #[case("failed", MigrationStatus::Failed)]
    fn test_status_text_round_trip(#[case] text: &str, #[case] status: MigrationStatus) {
        assert_eq!(text.parse::<MigrationStatus>().unwrap(), status);
        assert_eq!(status.to_string(), text);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!("done".parse::<MigrationStatus>().is_err());
    }

    async fn ledger() -> (Database, MigrationLedger) {
        let db = Database::connect_in_memory().await.unwrap();
        let ledger = MigrationLedger::from(&db);
        (db, ledger)
    }

    #[tokio::test]
    async fn test_upsert_creates_pending_entry() {
        let (db, ledger) = ledger().await;
        let record = ledger.upsert_pending("attachment", Some(7), "uploads/a.pdf").await.unwrap();
        assert_eq!(record.status, MigrationStatus::Pending);
        assert_eq!(record.entity_id, Some(7));
        assert_eq!(record.destination_path, None);
        db.close().await;
    }

    #[tokio::test]
    async fn test_upsert_preserves_existing_status() {
        let (db, ledger) = ledger().await;
        let record = ledger.upsert_pending("attachment", Some(7), "uploads/a.pdf").await.unwrap();
        ledger.mark_completed(record.id, "2026/08/ab12cd34_a.pdf", Some(1024), Some("deadbeef")).await.unwrap();
        let again = ledger.upsert_pending("attachment", Some(7), "uploads/a.pdf").await.unwrap();
        assert_eq!(again.id, record.id);
        assert_eq!(again.status, MigrationStatus::Completed);
        assert_eq!(again.file_size, Some(1024));
        assert!(again.migrated_at.is_some());
        db.close().await;
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (db, ledger) = ledger().await;
        let record = ledger.upsert_pending("document", None, "docs/manual.pdf").await.unwrap();
        ledger.mark_in_progress(record.id, "2026/08/11aa22bb_manual.pdf").await.unwrap();
        let current = ledger.find("document", None, "docs/manual.pdf").await.unwrap().unwrap();
        assert_eq!(current.status, MigrationStatus::InProgress);
        assert_eq!(current.destination_path.as_deref(), Some("2026/08/11aa22bb_manual.pdf"));

        ledger.mark_failed(record.id, "source file missing").await.unwrap();
        let current = ledger.find("document", None, "docs/manual.pdf").await.unwrap().unwrap();
        assert_eq!(current.status, MigrationStatus::Failed);
        assert_eq!(current.error_message.as_deref(), Some("source file missing"));
        assert_eq!(current.migrated_at, None);
        db.close().await;
    }

    #[tokio::test]
    async fn test_entries_keyed_per_entity() {
        let (db, ledger) = ledger().await;
        let a = ledger.upsert_pending("attachment", Some(1), "uploads/shared.pdf").await.unwrap();
        let b = ledger.upsert_pending("attachment", Some(2), "uploads/shared.pdf").await.unwrap();
        assert_ne!(a.id, b.id, "same path under different entities is two entries");
        db.close().await;
    }

    #[tokio::test]
    async fn test_counts_by_status() {
        let (db, ledger) = ledger().await;
        let a = ledger.upsert_pending("attachment", Some(1), "a").await.unwrap();
        let b = ledger.upsert_pending("attachment", Some(2), "b").await.unwrap();
        ledger.upsert_pending("attachment", Some(3), "c").await.unwrap();
        ledger.mark_completed(a.id, "x", None, None).await.unwrap();
        ledger.mark_failed(b.id, "boom").await.unwrap();
        let counts = ledger.counts_by_status().await.unwrap();
        assert_eq!(counts.get(&MigrationStatus::Completed), Some(&1));
        assert_eq!(counts.get(&MigrationStatus::Failed), Some(&1));
        assert_eq!(counts.get(&MigrationStatus::Pending), Some(&1));
        db.close().await;
    }

    #[tokio::test]
    async fn test_mark_missing_record() {
        let (db, ledger) = ledger().await;
        let err = ledger.mark_failed(999, "nope").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::RecordNotFound(_)));
        db.close().await;
    }
}
