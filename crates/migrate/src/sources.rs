//! Legacy file sources.
//!
//! Each source knows one family of database records that still reference
//! files by on-disk path: how to enumerate the un-migrated ones, and how to
//! rewrite a record once its file has moved. Every `pending_files` query
//! excludes entities whose migration the ledger already marked `completed`,
//! so re-running the batch after a rewrite does not resurface rewritten
//! values as new source paths.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqlitePool;

/// One un-migrated file reference pulled out of a legacy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFile {
    pub entity_id: Option<i64>,
    /// Path relative to the legacy storage root, exactly as stored.
    pub source_path: String,
    pub content_type: Option<String>,
}

/// A category of legacy records referencing on-disk files.
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Ledger `entity_type` for this category.
    fn entity_type(&self) -> &str;

    /// Logical directory migrated files are partitioned under.
    fn destination_base(&self) -> &str;

    /// Enumerate references not yet migrated.
    async fn pending_files(&self, pool: &SqlitePool) -> Result<Vec<LegacyFile>>;

    /// Point the referencing record at the migrated file.
    async fn rewrite_reference(&self, pool: &SqlitePool, file: &LegacyFile, new_url: &str) -> Result<()>;
}

/// All sources the surrounding application accumulates path references in.
pub fn default_sources() -> Vec<Box<dyn LegacySource>> {
    vec![
        Box::new(AttachmentSource),
        Box::new(ReportImageSource),
        Box::new(DocumentSource),
        Box::new(BrandingSource::logo()),
        Box::new(BrandingSource::icon()),
    ]
}

/// Project attachments: one file per row in `attachments.file_path`.
pub struct AttachmentSource;

#[async_trait]
impl LegacySource for AttachmentSource {
    fn entity_type(&self) -> &str {
        "attachment"
    }

    fn destination_base(&self) -> &str {
        "attachments"
    }

    async fn pending_files(&self, pool: &SqlitePool) -> Result<Vec<LegacyFile>> {
        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(
            "SELECT a.id, a.file_path, a.mime_type FROM attachments a \
             WHERE a.file_path != '' AND NOT EXISTS ( \
                 SELECT 1 FROM file_migrations m \
                 WHERE m.entity_type = 'attachment' AND m.entity_id = a.id AND m.status = 'completed')",
        )
        .fetch_all(pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(rows
            .into_iter()
            .map(|(id, path, mime)| LegacyFile { entity_id: Some(id), source_path: path, content_type: mime })
            .collect())
    }

    async fn rewrite_reference(&self, pool: &SqlitePool, file: &LegacyFile, new_url: &str) -> Result<()> {
        sqlx::query("UPDATE attachments SET file_path = ? WHERE id = ?")
            .bind(new_url)
            .bind(file.entity_id)
            .execute(pool)
            .await
            .or_raise(|| ErrorKind::ReferenceRewriteFailed(file.source_path.clone()))?;
        Ok(())
    }
}

/// Images embedded in reports as a JSON array column; several files can
/// belong to the same report row.
pub struct ReportImageSource;

#[async_trait]
impl LegacySource for ReportImageSource {
    fn entity_type(&self) -> &str {
        "report_image"
    }

    fn destination_base(&self) -> &str {
        "report-images"
    }

    async fn pending_files(&self, pool: &SqlitePool) -> Result<Vec<LegacyFile>> {
        // json_each flattens the array so each image is its own candidate.
        // Values containing a scheme are already rewritten; the ledger check
        // additionally covers local-driver rewrites, whose URLs are bare
        // logical paths equal to the recorded destination.
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT r.id, j.value FROM reports r, json_each(r.images) j \
             WHERE j.value NOT LIKE '%://%' AND NOT EXISTS ( \
                 SELECT 1 FROM file_migrations m \
                 WHERE m.entity_type = 'report_image' AND m.entity_id = r.id AND m.status = 'completed' \
                   AND (m.source_path = j.value OR m.destination_path = j.value))",
        )
        .fetch_all(pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(rows
            .into_iter()
            .map(|(id, path)| LegacyFile { entity_id: Some(id), source_path: path, content_type: None })
            .collect())
    }

    async fn rewrite_reference(&self, pool: &SqlitePool, file: &LegacyFile, new_url: &str) -> Result<()> {
        let images: Option<String> = sqlx::query_scalar("SELECT images FROM reports WHERE id = ?")
            .bind(file.entity_id)
            .fetch_optional(pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let images =
            images.ok_or_else(|| exn::Exn::from(ErrorKind::ReferenceRewriteFailed(file.source_path.clone())))?;
        let mut parsed: Vec<String> = serde_json::from_str(&images)
            .or_raise(|| ErrorKind::ReferenceRewriteFailed(file.source_path.clone()))?;
        let mut replaced = false;
        for entry in &mut parsed {
            if *entry == file.source_path {
                *entry = new_url.to_string();
                replaced = true;
            }
        }
        if !replaced {
            exn::bail!(ErrorKind::ReferenceRewriteFailed(format!(
                "image `{}` no longer present in report {:?}",
                file.source_path, file.entity_id
            )));
        }
        let serialized = serde_json::to_string(&parsed)
            .or_raise(|| ErrorKind::ReferenceRewriteFailed(file.source_path.clone()))?;
        sqlx::query("UPDATE reports SET images = ? WHERE id = ?")
            .bind(serialized)
            .bind(file.entity_id)
            .execute(pool)
            .await
            .or_raise(|| ErrorKind::ReferenceRewriteFailed(file.source_path.clone()))?;
        Ok(())
    }
}

/// Standalone documents: one file per row in `documents.file_path`.
pub struct DocumentSource;

#[async_trait]
impl LegacySource for DocumentSource {
    fn entity_type(&self) -> &str {
        "document"
    }

    fn destination_base(&self) -> &str {
        "documents"
    }

    async fn pending_files(&self, pool: &SqlitePool) -> Result<Vec<LegacyFile>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT d.id, d.file_path FROM documents d \
             WHERE d.file_path != '' AND NOT EXISTS ( \
                 SELECT 1 FROM file_migrations m \
                 WHERE m.entity_type = 'document' AND m.entity_id = d.id AND m.status = 'completed')",
        )
        .fetch_all(pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(rows
            .into_iter()
            .map(|(id, path)| LegacyFile { entity_id: Some(id), source_path: path, content_type: None })
            .collect())
    }

    async fn rewrite_reference(&self, pool: &SqlitePool, file: &LegacyFile, new_url: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET file_path = ? WHERE id = ?")
            .bind(new_url)
            .bind(file.entity_id)
            .execute(pool)
            .await
            .or_raise(|| ErrorKind::ReferenceRewriteFailed(file.source_path.clone()))?;
        Ok(())
    }
}

/// Branding assets: the logo and icon columns are treated as separate
/// categories so each column migrates independently.
pub struct BrandingSource {
    entity_type: &'static str,
    column: &'static str,
}

impl BrandingSource {
    pub fn logo() -> Self {
        Self { entity_type: "branding_logo", column: "logo_path" }
    }

    pub fn icon() -> Self {
        Self { entity_type: "branding_icon", column: "icon_path" }
    }
}

#[async_trait]
impl LegacySource for BrandingSource {
    fn entity_type(&self) -> &str {
        self.entity_type
    }

    fn destination_base(&self) -> &str {
        "branding"
    }

    async fn pending_files(&self, pool: &SqlitePool) -> Result<Vec<LegacyFile>> {
        // `column` is one of two static identifiers, never user input.
        let rows: Vec<(i64, String)> = sqlx::query_as(&format!(
            "SELECT b.id, b.{column} FROM branding b \
             WHERE b.{column} IS NOT NULL AND b.{column} != '' AND NOT EXISTS ( \
                 SELECT 1 FROM file_migrations m \
                 WHERE m.entity_type = '{entity_type}' AND m.entity_id = b.id AND m.status = 'completed')",
            column = self.column,
            entity_type = self.entity_type,
        ))
        .fetch_all(pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(rows
            .into_iter()
            .map(|(id, path)| LegacyFile { entity_id: Some(id), source_path: path, content_type: None })
            .collect())
    }

    async fn rewrite_reference(&self, pool: &SqlitePool, file: &LegacyFile, new_url: &str) -> Result<()> {
        sqlx::query(&format!("UPDATE branding SET {} = ? WHERE id = ?", self.column))
            .bind(new_url)
            .bind(file.entity_id)
            .execute(pool)
            .await
            .or_raise(|| ErrorKind::ReferenceRewriteFailed(file.source_path.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_db::Database;

    #[tokio::test]
    async fn test_attachment_enumeration_and_rewrite() {
        let db = Database::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO attachments (project_id, file_name, file_path, mime_type) VALUES (1, 'a.pdf', 'uploads/a.pdf', 'application/pdf')")
            .execute(db.pool())
            .await
            .unwrap();
        let source = AttachmentSource;
        let pending = source.pending_files(db.pool()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_path, "uploads/a.pdf");
        assert_eq!(pending[0].content_type.as_deref(), Some("application/pdf"));

        source.rewrite_reference(db.pool(), &pending[0], "attachments/2026/08/ab_a.pdf").await.unwrap();
        let path: String = sqlx::query_scalar("SELECT file_path FROM attachments WHERE id = ?")
            .bind(pending[0].entity_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(path, "attachments/2026/08/ab_a.pdf");
        db.close().await;
    }

    #[tokio::test]
    async fn test_completed_entities_are_excluded() {
        let db = Database::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO documents (title, file_path) VALUES ('Manual', 'docs/manual.pdf')")
            .execute(db.pool())
            .await
            .unwrap();
        let ledger = fieldops_db::MigrationLedger::from(&db);
        let record = ledger.upsert_pending("document", Some(1), "docs/manual.pdf").await.unwrap();
        ledger.mark_completed(record.id, "documents/2026/08/cd_manual.pdf", None, None).await.unwrap();
        assert!(DocumentSource.pending_files(db.pool()).await.unwrap().is_empty());
        db.close().await;
    }

    #[tokio::test]
    async fn test_report_images_flatten_and_rewrite() {
        let db = Database::connect_in_memory().await.unwrap();
        sqlx::query(r#"INSERT INTO reports (images) VALUES ('["photos/1.jpg","photos/2.jpg"]')"#)
            .execute(db.pool())
            .await
            .unwrap();
        let source = ReportImageSource;
        let pending = source.pending_files(db.pool()).await.unwrap();
        assert_eq!(pending.len(), 2);

        source.rewrite_reference(db.pool(), &pending[0], "mock://report-images/2026/08/ef_1.jpg").await.unwrap();
        let images: String =
            sqlx::query_scalar("SELECT images FROM reports WHERE id = 1").fetch_one(db.pool()).await.unwrap();
        let parsed: Vec<String> = serde_json::from_str(&images).unwrap();
        assert_eq!(parsed[0], "mock://report-images/2026/08/ef_1.jpg");
        assert_eq!(parsed[1], "photos/2.jpg");

        // The rewritten entry no longer counts as pending.
        let pending = source.pending_files(db.pool()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_path, "photos/2.jpg");
        db.close().await;
    }

    #[tokio::test]
    async fn test_rewrite_missing_image_fails() {
        let db = Database::connect_in_memory().await.unwrap();
        sqlx::query(r#"INSERT INTO reports (images) VALUES ('["photos/1.jpg"]')"#)
            .execute(db.pool())
            .await
            .unwrap();
        let ghost =
            LegacyFile { entity_id: Some(1), source_path: "photos/ghost.jpg".to_string(), content_type: None };
        let err = ReportImageSource.rewrite_reference(db.pool(), &ghost, "anything").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReferenceRewriteFailed(_)));
        db.close().await;
    }

    #[tokio::test]
    async fn test_branding_columns_are_independent() {
        let db = Database::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO branding (logo_path, icon_path) VALUES ('brand/logo.png', 'brand/icon.png')")
            .execute(db.pool())
            .await
            .unwrap();
        let logos = BrandingSource::logo().pending_files(db.pool()).await.unwrap();
        let icons = BrandingSource::icon().pending_files(db.pool()).await.unwrap();
        assert_eq!(logos[0].source_path, "brand/logo.png");
        assert_eq!(icons[0].source_path, "brand/icon.png");
        db.close().await;
    }
}
