//! Diesel-based project repository for SQLite/PostgreSQL.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{NewProject, ProjectRecord};
use super::pool::DbPool;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::Project;
use crate::schema::projects;
use crate::with_conn;

impl From<ProjectRecord> for Project {
    fn from(record: ProjectRecord) -> Self {
        Project {
            id: record.id,
            owner_id: record.owner_id,
            name: record.name,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based repository for the `projects` table.
#[derive(Clone)]
pub struct ProjectRepository {
    pool: DbPool,
}

impl ProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project: &Project) -> Result<()> {
        let created_at = project.created_at.to_rfc3339();
        let updated_at = project.updated_at.to_rfc3339();

        let new_project = NewProject {
            id: &project.id,
            owner_id: &project.owner_id,
            name: &project.name,
            created_at: &created_at,
            updated_at: &updated_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(projects::table)
                .values(&new_project)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Project>> {
        let record: Option<ProjectRecord> = with_conn!(self.pool, conn => {
            projects::table
                .find(id)
                .first::<ProjectRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(Project::from))
    }

    pub async fn require(&self, id: &str) -> Result<Project> {
        self.get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("project {id}")))
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
                CREATE TABLE projects (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                "#,
            )
            .await
            .unwrap();
        });

        (pool, dir)
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let (pool, _dir) = setup().await;
        let repo = ProjectRepository::new(pool);

        let project = Project::new("proj-1".into(), "user-1".into(), "Tower A".into());
        repo.create(&project).await.unwrap();

        let fetched = repo.require("proj-1").await.unwrap();
        assert_eq!(fetched.name, "Tower A");
    }
}
