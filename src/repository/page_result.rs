//! Diesel-based page result repository for SQLite/PostgreSQL.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{NewPageResult, PageResultRecord};
use super::pool::DbPool;
use super::{parse_datetime, Result};
use crate::models::PageResult;
use crate::schema::page_results;
use crate::with_conn;

impl From<PageResultRecord> for PageResult {
    fn from(record: PageResultRecord) -> Self {
        PageResult {
            id: record.id,
            job_id: record.job_id,
            drawing_version_id: record.drawing_version_id,
            page_index: record.page_index,
            image_ref: record.image_ref,
            drawing_name: record.drawing_name,
            extracted_metadata: serde_json::from_str(&record.extracted_metadata)
                .unwrap_or(serde_json::Value::Null),
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based repository for the `page_results` table.
///
/// Write-once: a `(drawing_version_id, page_index)` pair is produced by
/// exactly one OCR worker completion.
#[derive(Clone)]
pub struct PageResultRepository {
    pool: DbPool,
}

impl PageResultRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a page result. A duplicate `(drawing_version_id, page_index)`
    /// violates the table's unique constraint; the caller is expected to
    /// have already discarded the event via `PageTask::mark_completed`
    /// returning `false`.
    pub async fn create(&self, result: &PageResult) -> Result<()> {
        let extracted_metadata = serde_json::to_string(&result.extracted_metadata)?;
        let created_at = result.created_at.to_rfc3339();

        let new_result = NewPageResult {
            id: &result.id,
            job_id: &result.job_id,
            drawing_version_id: &result.drawing_version_id,
            page_index: result.page_index,
            image_ref: &result.image_ref,
            drawing_name: result.drawing_name.as_deref(),
            extracted_metadata: &extracted_metadata,
            created_at: &created_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(page_results::table)
                .values(&new_result)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    pub async fn get_by_page(
        &self,
        drawing_version_id: &str,
        page_index: i32,
    ) -> Result<Option<PageResult>> {
        let record: Option<PageResultRecord> = with_conn!(self.pool, conn => {
            page_results::table
                .filter(page_results::drawing_version_id.eq(drawing_version_id))
                .filter(page_results::page_index.eq(page_index))
                .first::<PageResultRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(PageResult::from))
    }

    /// List every page result for a drawing version, ordered by page index.
    pub async fn list_for_version(&self, drawing_version_id: &str) -> Result<Vec<PageResult>> {
        let records: Vec<PageResultRecord> = with_conn!(self.pool, conn => {
            page_results::table
                .filter(page_results::drawing_version_id.eq(drawing_version_id))
                .order(page_results::page_index.asc())
                .load::<PageResultRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(PageResult::from).collect())
    }

    /// List every page result produced for a job, across both versions.
    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<PageResult>> {
        let records: Vec<PageResultRecord> = with_conn!(self.pool, conn => {
            page_results::table
                .filter(page_results::job_id.eq(job_id))
                .load::<PageResultRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(PageResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use diesel_async::SimpleAsyncConnection;
    use tempfile::tempdir;

    async fn setup() -> (DbPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = DbPool::sqlite_from_path(&db_path);

        with_conn!(pool, conn => {
            conn.batch_execute(
                r#"
                CREATE TABLE page_results (
                    id TEXT PRIMARY KEY,
                    job_id TEXT NOT NULL,
                    drawing_version_id TEXT NOT NULL,
                    page_index INTEGER NOT NULL,
                    image_ref TEXT NOT NULL,
                    drawing_name TEXT,
                    extracted_metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    UNIQUE(drawing_version_id, page_index)
                );
                "#,
            )
            .await
            .unwrap();
        });

        (pool, dir)
    }

    #[tokio::test]
    async fn create_and_list_for_version() {
        let (pool, _dir) = setup().await;
        let repo = PageResultRepository::new(pool);

        let result = PageResult {
            id: "result-1".into(),
            job_id: "job-1".into(),
            drawing_version_id: "old-1".into(),
            page_index: 0,
            image_ref: "drawings/old-1/pages/0.png".into(),
            drawing_name: Some("A-101".into()),
            extracted_metadata: serde_json::json!({"confidence": 0.9}),
            created_at: Utc::now(),
        };
        repo.create(&result).await.unwrap();

        let fetched = repo.get_by_page("old-1", 0).await.unwrap().unwrap();
        assert_eq!(fetched.drawing_name.as_deref(), Some("A-101"));

        let list = repo.list_for_version("old-1").await.unwrap();
        assert_eq!(list.len(), 1);
    }
}
