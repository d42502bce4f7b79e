//! Diesel-based job repository for SQLite/PostgreSQL.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{JobRecord, NewJob};
use super::pool::DbPool;
use super::{parse_datetime, parse_datetime_opt, RepositoryError, Result};
use crate::models::{Job, JobStatus};
use crate::schema::jobs;
use crate::with_conn;

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Job {
            id: record.id,
            project_id: record.project_id,
            old_version_id: record.old_version_id,
            new_version_id: record.new_version_id,
            created_by: record.created_by,
            status: JobStatus::from_str(&record.status).unwrap_or(JobStatus::Queued),
            unmatched_old_names: serde_json::from_str(&record.unmatched_old_names)
                .unwrap_or_default(),
            unmatched_new_names: serde_json::from_str(&record.unmatched_new_names)
                .unwrap_or_default(),
            created_at: parse_datetime(&record.created_at),
            started_at: parse_datetime_opt(record.started_at),
            completed_at: parse_datetime_opt(record.completed_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based repository for the `jobs` table.
#[derive(Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new job in `Queued` status.
    pub async fn create(&self, job: &Job) -> Result<()> {
        let status = job.status.as_str();
        let unmatched_old_names = serde_json::to_string(&job.unmatched_old_names)?;
        let unmatched_new_names = serde_json::to_string(&job.unmatched_new_names)?;
        let created_at = job.created_at.to_rfc3339();
        let started_at = job.started_at.map(|dt| dt.to_rfc3339());
        let completed_at = job.completed_at.map(|dt| dt.to_rfc3339());
        let updated_at = job.updated_at.to_rfc3339();

        let new_job = NewJob {
            id: &job.id,
            project_id: &job.project_id,
            old_version_id: &job.old_version_id,
            new_version_id: &job.new_version_id,
            created_by: &job.created_by,
            status,
            unmatched_old_names: &unmatched_old_names,
            unmatched_new_names: &unmatched_new_names,
            created_at: &created_at,
            started_at: started_at.as_deref(),
            completed_at: completed_at.as_deref(),
            updated_at: &updated_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(jobs::table)
                .values(&new_job)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let record: Option<JobRecord> = with_conn!(self.pool, conn => {
            jobs::table
                .find(id)
                .first::<JobRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(Job::from))
    }

    /// Fetch a job by id, returning `NotFound` if it doesn't exist.
    pub async fn require(&self, id: &str) -> Result<Job> {
        self.get(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("job {id}")))
    }

    /// List all jobs, newest first.
    pub async fn list_all(&self) -> Result<Vec<Job>> {
        let records: Vec<JobRecord> = with_conn!(self.pool, conn => {
            jobs::table
                .order(jobs::created_at.desc())
                .load::<JobRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(Job::from).collect())
    }

    /// Transition a queued job to running, stamping `started_at`.
    ///
    /// Idempotent: a no-op (zero rows affected) if the job is not currently
    /// `Queued`, so a duplicate start event cannot rewind `started_at`.
    pub async fn mark_running(&self, id: &str) -> Result<bool> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                jobs::table
                    .filter(jobs::id.eq(id))
                    .filter(jobs::status.eq(JobStatus::Queued.as_str())),
            )
            .set((
                jobs::status.eq(JobStatus::Running.as_str()),
                jobs::started_at.eq(&now_str),
                jobs::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Transition a running job to one of its terminal statuses, stamping
    /// `completed_at`. Idempotent for the same reason as [`Self::mark_running`].
    pub async fn mark_terminal(&self, id: &str, status: JobStatus) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();
        let status_str = status.as_str();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                jobs::table
                    .filter(jobs::id.eq(id))
                    .filter(jobs::status.eq(JobStatus::Running.as_str())),
            )
            .set((
                jobs::status.eq(status_str),
                jobs::completed_at.eq(&now_str),
                jobs::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Reopen a job to `running` unconditionally, used by the manual
    /// overlay / `regenerate_summary` hook (§6): a job that already reached
    /// a terminal status returns to `running` until the regenerated summary
    /// completes.
    pub async fn reopen_running(&self, id: &str) -> Result<()> {
        let now_str = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn => {
            diesel::update(jobs::table.filter(jobs::id.eq(id)))
                .set((
                    jobs::status.eq(JobStatus::Running.as_str()),
                    jobs::completed_at.eq(None::<&str>),
                    jobs::updated_at.eq(&now_str),
                ))
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    /// Record the drawing names from one side that had no counterpart on
    /// the other, as produced by the pairing resolver.
    pub async fn set_unmatched_names(
        &self,
        id: &str,
        unmatched_old_names: &[String],
        unmatched_new_names: &[String],
    ) -> Result<()> {
        let old_json = serde_json::to_string(unmatched_old_names)?;
        let new_json = serde_json::to_string(unmatched_new_names)?;
        let now_str = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn => {
            diesel::update(jobs::table.filter(jobs::id.eq(id)))
                .set((
                    jobs::unmatched_old_names.eq(&old_json),
                    jobs::unmatched_new_names.eq(&new_json),
                    jobs::updated_at.eq(&now_str),
                ))
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }
}
