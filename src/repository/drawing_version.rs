//! Diesel-based drawing version repository for SQLite/PostgreSQL.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{DrawingVersionRecord, NewDrawingVersion};
use super::pool::DbPool;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::DrawingVersion;
use crate::schema::drawing_versions;
use crate::with_conn;

impl From<DrawingVersionRecord> for DrawingVersion {
    fn from(record: DrawingVersionRecord) -> Self {
        DrawingVersion {
            id: record.id,
            project_id: record.project_id,
            storage_ref: record.storage_ref,
            page_count: record.page_count,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based repository for the `drawing_versions` table. Rows are
/// immutable once inserted.
#[derive(Clone)]
pub struct DrawingVersionRepository {
    pool: DbPool,
}

impl DrawingVersionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, version: &DrawingVersion) -> Result<()> {
        let created_at = version.created_at.to_rfc3339();

        let new_version = NewDrawingVersion {
            id: &version.id,
            project_id: &version.project_id,
            storage_ref: &version.storage_ref,
            page_count: version.page_count,
            created_at: &created_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(drawing_versions::table)
                .values(&new_version)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DrawingVersion>> {
        let record: Option<DrawingVersionRecord> = with_conn!(self.pool, conn => {
            drawing_versions::table
                .find(id)
                .first::<DrawingVersionRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(DrawingVersion::from))
    }

    /// Fetch a drawing version, failing with `precondition_missing`-worthy
    /// `NotFound` if it doesn't exist (spec §4.1 `start_job` precondition).
    pub async fn require(&self, id: &str) -> Result<DrawingVersion> {
        self.get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("drawing version {id}")))
    }

    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<DrawingVersion>> {
        let records: Vec<DrawingVersionRecord> = with_conn!(self.pool, conn => {
            drawing_versions::table
                .filter(drawing_versions::project_id.eq(project_id))
                .load::<DrawingVersionRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(DrawingVersion::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel_async::SimpleAsyncConnection;
    use tempfile::tempdir;

    async fn setup() -> (DbPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = DbPool::sqlite_from_path(&db_path);

        with_conn!(pool, conn => {
            conn.batch_execute(
                r#"
                CREATE TABLE drawing_versions (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    storage_ref TEXT NOT NULL,
                    page_count INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );
                "#,
            )
            .await
            .unwrap();
        });

        (pool, dir)
    }

    #[tokio::test]
    async fn create_and_require_round_trips() {
        let (pool, _dir) = setup().await;
        let repo = DrawingVersionRepository::new(pool);

        let version = DrawingVersion::new("old-1".into(), "proj-1".into(), "drawings/old-1/raw.pdf".into(), 10);
        repo.create(&version).await.unwrap();

        let fetched = repo.require("old-1").await.unwrap();
        assert_eq!(fetched.page_count, 10);
    }

    #[tokio::test]
    async fn require_fails_for_missing_version() {
        let (pool, _dir) = setup().await;
        let repo = DrawingVersionRepository::new(pool);
        assert!(repo.require("missing").await.is_err());
    }
}
