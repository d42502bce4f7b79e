//! Diesel-based page task repository for SQLite/PostgreSQL.
//!
//! Holds the idempotent completion-transition logic (I6/P3): every terminal
//! transition is a conditional `UPDATE ... WHERE status = ?`, so a duplicate
//! completion event for an already-terminal task is a no-op rather than a
//! double count.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{NewPageTask, PageTaskRecord};
use super::pool::DbPool;
use super::{parse_datetime, parse_datetime_opt, RepositoryError, Result};
use crate::models::{PageTask, StageKind, TaskErrorKind, TaskStatus};
use crate::schema::page_tasks;
use crate::with_conn;

impl From<PageTaskRecord> for PageTask {
    fn from(record: PageTaskRecord) -> Self {
        PageTask {
            id: record.id,
            job_id: record.job_id,
            stage_kind: StageKind::from_str(&record.stage_kind).unwrap_or(StageKind::OcrOld),
            drawing_version_id: record.drawing_version_id,
            page_index: record.page_index,
            old_page_index: record.old_page_index,
            new_page_index: record.new_page_index,
            drawing_name: record.drawing_name,
            attempt_count: record.attempt_count,
            status: TaskStatus::from_str(&record.status).unwrap_or(TaskStatus::Pending),
            error_kind: record.error_kind.as_deref().and_then(TaskErrorKind::from_str),
            error_message: record.error_message,
            next_retry_at: parse_datetime_opt(record.next_retry_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based repository for the `page_tasks` table.
#[derive(Clone)]
pub struct PageTaskRepository {
    pool: DbPool,
}

impl PageTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new task in `Pending` status.
    pub async fn create(&self, task: &PageTask) -> Result<()> {
        let stage_kind = task.stage_kind.as_str();
        let status = task.status.as_str();
        let error_kind = task.error_kind.map(|k| k.as_str());
        let next_retry_at = task.next_retry_at.map(|dt| dt.to_rfc3339());
        let created_at = task.created_at.to_rfc3339();
        let updated_at = task.updated_at.to_rfc3339();

        let new_task = NewPageTask {
            id: &task.id,
            job_id: &task.job_id,
            stage_kind,
            drawing_version_id: task.drawing_version_id.as_deref(),
            page_index: task.page_index,
            old_page_index: task.old_page_index,
            new_page_index: task.new_page_index,
            drawing_name: task.drawing_name.as_deref(),
            attempt_count: task.attempt_count,
            status,
            error_kind,
            error_message: task.error_message.as_deref(),
            next_retry_at: next_retry_at.as_deref(),
            created_at: &created_at,
            updated_at: &updated_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(page_tasks::table)
                .values(&new_task)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    /// Insert many tasks in one round trip.
    pub async fn create_many(&self, tasks: &[PageTask]) -> Result<()> {
        for task in tasks {
            self.create(task).await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<PageTask>> {
        let record: Option<PageTaskRecord> = with_conn!(self.pool, conn => {
            page_tasks::table
                .find(id)
                .first::<PageTaskRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(PageTask::from))
    }

    pub async fn require(&self, id: &str) -> Result<PageTask> {
        self.get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("page task {id}")))
    }

    /// List every task for a (job, stage), in no particular order.
    pub async fn list_for_stage(&self, job_id: &str, stage_kind: StageKind) -> Result<Vec<PageTask>> {
        let records: Vec<PageTaskRecord> = with_conn!(self.pool, conn => {
            page_tasks::table
                .filter(page_tasks::job_id.eq(job_id))
                .filter(page_tasks::stage_kind.eq(stage_kind.as_str()))
                .load::<PageTaskRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(PageTask::from).collect())
    }

    /// List tasks ready to dispatch: `Pending` and either never scheduled
    /// for retry, or whose `next_retry_at` has already elapsed.
    pub async fn list_dispatchable(&self, job_id: &str, stage_kind: StageKind) -> Result<Vec<PageTask>> {
        let now_str = Utc::now().to_rfc3339();

        let records: Vec<PageTaskRecord> = with_conn!(self.pool, conn => {
            page_tasks::table
                .filter(page_tasks::job_id.eq(job_id))
                .filter(page_tasks::stage_kind.eq(stage_kind.as_str()))
                .filter(page_tasks::status.eq(TaskStatus::Pending.as_str()))
                .filter(
                    page_tasks::next_retry_at
                        .is_null()
                        .or(page_tasks::next_retry_at.le(&now_str)),
                )
                .load::<PageTaskRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(PageTask::from).collect())
    }

    /// Atomically move a pending task into `Running`. Returns `false` if
    /// another dispatcher already claimed it (or it's no longer pending).
    pub async fn claim(&self, id: &str) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                page_tasks::table
                    .filter(page_tasks::id.eq(id))
                    .filter(page_tasks::status.eq(TaskStatus::Pending.as_str())),
            )
            .set((
                page_tasks::status.eq(TaskStatus::Running.as_str()),
                page_tasks::attempt_count.eq(page_tasks::attempt_count + 1),
                page_tasks::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Mark a running task completed. Returns `false` (no-op) if the task
    /// is not currently `Running` — the conditional-update pattern that
    /// makes duplicate completion events for a terminal task idempotent (I6/P3).
    pub async fn mark_completed(&self, id: &str) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                page_tasks::table
                    .filter(page_tasks::id.eq(id))
                    .filter(page_tasks::status.eq(TaskStatus::Running.as_str())),
            )
            .set((
                page_tasks::status.eq(TaskStatus::Completed.as_str()),
                page_tasks::error_kind.eq(None::<&str>),
                page_tasks::error_message.eq(None::<&str>),
                page_tasks::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Mark a running task as terminally failed. Idempotent like [`Self::mark_completed`].
    pub async fn mark_failed(
        &self,
        id: &str,
        error_kind: TaskErrorKind,
        error_message: &str,
    ) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();
        let kind_str = error_kind.as_str();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                page_tasks::table
                    .filter(page_tasks::id.eq(id))
                    .filter(page_tasks::status.eq(TaskStatus::Running.as_str())),
            )
            .set((
                page_tasks::status.eq(TaskStatus::Failed.as_str()),
                page_tasks::error_kind.eq(kind_str),
                page_tasks::error_message.eq(error_message),
                page_tasks::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Return a running task to `Pending` for a later retry attempt,
    /// recording the error kind that caused the retry and the backoff
    /// deadline. Idempotent like [`Self::mark_completed`].
    pub async fn schedule_retry(
        &self,
        id: &str,
        error_kind: TaskErrorKind,
        error_message: &str,
        next_retry_at: chrono::DateTime<Utc>,
    ) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();
        let retry_str = next_retry_at.to_rfc3339();
        let kind_str = error_kind.as_str();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                page_tasks::table
                    .filter(page_tasks::id.eq(id))
                    .filter(page_tasks::status.eq(TaskStatus::Running.as_str())),
            )
            .set((
                page_tasks::status.eq(TaskStatus::Pending.as_str()),
                page_tasks::error_kind.eq(kind_str),
                page_tasks::error_message.eq(error_message),
                page_tasks::next_retry_at.eq(&retry_str),
                page_tasks::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Cancel every non-terminal task for a job (job cancellation, §4/§6).
    /// Returns the number of tasks actually cancelled.
    pub async fn cancel_all_for_job(&self, job_id: &str) -> Result<usize> {
        let now_str = Utc::now().to_rfc3339();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                page_tasks::table
                    .filter(page_tasks::job_id.eq(job_id))
                    .filter(
                        page_tasks::status
                            .eq(TaskStatus::Pending.as_str())
                            .or(page_tasks::status.eq(TaskStatus::Running.as_str())),
                    ),
            )
            .set((
                page_tasks::status.eq(TaskStatus::Cancelled.as_str()),
                page_tasks::error_kind.eq(TaskErrorKind::Cancelled.as_str()),
                page_tasks::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows)
    }

    /// Count tasks for a stage grouped by terminality, used to verify
    /// quiescence independent of the cached counters on `job_stages`.
    pub async fn count_terminal(&self, job_id: &str, stage_kind: StageKind) -> Result<i64> {
        use diesel::dsl::count_star;

        let count: i64 = with_conn!(self.pool, conn => {
            page_tasks::table
                .filter(page_tasks::job_id.eq(job_id))
                .filter(page_tasks::stage_kind.eq(stage_kind.as_str()))
                .filter(
                    page_tasks::status
                        .eq(TaskStatus::Completed.as_str())
                        .or(page_tasks::status.eq(TaskStatus::Failed.as_str()))
                        .or(page_tasks::status.eq(TaskStatus::Cancelled.as_str())),
                )
                .select(count_star())
                .first(&mut conn)
                .await?
        });

        Ok(count)
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
                CREATE TABLE page_tasks (
                    id TEXT PRIMARY KEY,
                    job_id TEXT NOT NULL,
                    stage_kind TEXT NOT NULL,
                    drawing_version_id TEXT,
                    page_index INTEGER,
                    old_page_index INTEGER,
                    new_page_index INTEGER,
                    drawing_name TEXT,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL,
                    error_kind TEXT,
                    error_message TEXT,
                    next_retry_at TEXT,
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
    async fn duplicate_completion_event_is_a_no_op() {
        let (pool, _dir) = setup().await;
        let repo = PageTaskRepository::new(pool);

        let task = PageTask::new_ocr(
            "task-1".into(),
            "job-1".into(),
            StageKind::OcrOld,
            "drawing-1".into(),
            0,
        );
        repo.create(&task).await.unwrap();
        repo.claim("task-1").await.unwrap();

        assert!(repo.mark_completed("task-1").await.unwrap());
        // A duplicate completion event for the same (now terminal) task
        // must be acknowledged but must not be double-counted.
        assert!(!repo.mark_completed("task-1").await.unwrap());

        let fetched = repo.require("task-1").await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn retry_then_completion_round_trips() {
        let (pool, _dir) = setup().await;
        let repo = PageTaskRepository::new(pool);

        let task = PageTask::new_ocr(
            "task-1".into(),
            "job-1".into(),
            StageKind::OcrOld,
            "drawing-1".into(),
            0,
        );
        repo.create(&task).await.unwrap();
        repo.claim("task-1").await.unwrap();

        let retry_at = Utc::now() + chrono::Duration::seconds(30);
        assert!(repo
            .schedule_retry(
                "task-1",
                TaskErrorKind::ExtractorUnavailable,
                "timed out",
                retry_at
            )
            .await
            .unwrap());

        let fetched = repo.require("task-1").await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.attempt_count, 1);
        assert!(fetched.can_retry(3));

        // Not dispatchable yet (next_retry_at is in the future).
        let dispatchable = repo.list_dispatchable("job-1", StageKind::OcrOld).await.unwrap();
        assert!(dispatchable.is_empty());

        repo.claim("task-1").await.unwrap();
        assert!(repo.mark_completed("task-1").await.unwrap());
        let fetched = repo.require("task-1").await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_all_for_job_only_touches_non_terminal_tasks() {
        let (pool, _dir) = setup().await;
        let repo = PageTaskRepository::new(pool);

        let pending = PageTask::new_ocr("t-pending".into(), "job-1".into(), StageKind::OcrOld, "d".into(), 0);
        let completed = PageTask::new_ocr("t-done".into(), "job-1".into(), StageKind::OcrOld, "d".into(), 1);
        repo.create(&pending).await.unwrap();
        repo.create(&completed).await.unwrap();
        repo.claim("t-done").await.unwrap();
        repo.mark_completed("t-done").await.unwrap();

        let cancelled = repo.cancel_all_for_job("job-1").await.unwrap();
        assert_eq!(cancelled, 1);

        let done = repo.require("t-done").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }
}
