//! Diesel-based diff result repository for SQLite/PostgreSQL.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{DiffResultRecord, NewDiffResult};
use super::pool::DbPool;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::DiffResult;
use crate::schema::diff_results;
use crate::with_conn;

impl From<DiffResultRecord> for DiffResult {
    fn from(record: DiffResultRecord) -> Self {
        DiffResult {
            id: record.id,
            job_id: record.job_id,
            drawing_name: record.drawing_name,
            old_image_ref: record.old_image_ref,
            new_image_ref: record.new_image_ref,
            overlay_ref: record.overlay_ref,
            alignment_score: record.alignment_score,
            change_detected: record.change_detected != 0,
            change_count: record.change_count,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based repository for the `diff_results` table, keyed by
/// `(job_id, drawing_name)`.
#[derive(Clone)]
pub struct DiffResultRepository {
    pool: DbPool,
}

impl DiffResultRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, result: &DiffResult) -> Result<()> {
        let change_detected = if result.change_detected { 1 } else { 0 };
        let created_at = result.created_at.to_rfc3339();

        let new_result = NewDiffResult {
            id: &result.id,
            job_id: &result.job_id,
            drawing_name: &result.drawing_name,
            old_image_ref: &result.old_image_ref,
            new_image_ref: &result.new_image_ref,
            overlay_ref: &result.overlay_ref,
            alignment_score: result.alignment_score,
            change_detected,
            change_count: result.change_count,
            created_at: &created_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(diff_results::table)
                .values(&new_result)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DiffResult>> {
        let record: Option<DiffResultRecord> = with_conn!(self.pool, conn => {
            diff_results::table
                .find(id)
                .first::<DiffResultRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(DiffResult::from))
    }

    pub async fn get_by_drawing(&self, job_id: &str, drawing_name: &str) -> Result<Option<DiffResult>> {
        let record: Option<DiffResultRecord> = with_conn!(self.pool, conn => {
            diff_results::table
                .filter(diff_results::job_id.eq(job_id))
                .filter(diff_results::drawing_name.eq(drawing_name))
                .first::<DiffResultRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(DiffResult::from))
    }

    pub async fn require_by_drawing(&self, job_id: &str, drawing_name: &str) -> Result<DiffResult> {
        self.get_by_drawing(job_id, drawing_name)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("diff result {job_id}/{drawing_name}")))
    }

    /// List every diff result for a job.
    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<DiffResult>> {
        let records: Vec<DiffResultRecord> = with_conn!(self.pool, conn => {
            diff_results::table
                .filter(diff_results::job_id.eq(job_id))
                .load::<DiffResultRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(DiffResult::from).collect())
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
                CREATE TABLE diff_results (
                    id TEXT PRIMARY KEY,
                    job_id TEXT NOT NULL,
                    drawing_name TEXT NOT NULL,
                    old_image_ref TEXT NOT NULL,
                    new_image_ref TEXT NOT NULL,
                    overlay_ref TEXT NOT NULL,
                    alignment_score DOUBLE PRECISION NOT NULL,
                    change_detected INTEGER NOT NULL,
                    change_count BIGINT,
                    created_at TEXT NOT NULL,
                    UNIQUE(job_id, drawing_name)
                );
                "#,
            )
            .await
            .unwrap();
        });

        (pool, dir)
    }

    #[tokio::test]
    async fn create_and_get_by_drawing() {
        let (pool, _dir) = setup().await;
        let repo = DiffResultRepository::new(pool);

        let result = DiffResult {
            id: "diff-1".into(),
            job_id: "job-1".into(),
            drawing_name: "A-101".into(),
            old_image_ref: "drawings/old-1/pages/0.png".into(),
            new_image_ref: "drawings/new-1/pages/0.png".into(),
            overlay_ref: "jobs/job-1/overlays/A-101.png".into(),
            alignment_score: 0.97,
            change_detected: true,
            change_count: Some(3),
            created_at: Utc::now(),
        };
        repo.create(&result).await.unwrap();

        let fetched = repo.require_by_drawing("job-1", "A-101").await.unwrap();
        assert!(fetched.change_detected);
        assert_eq!(fetched.change_count, Some(3));
    }
}
