//! Diesel-based job stage repository for SQLite/PostgreSQL.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{JobStageRecord, NewJobStage};
use super::pool::DbPool;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::{JobStage, StageKind, StageStatus};
use crate::schema::job_stages;
use crate::with_conn;

impl From<JobStageRecord> for JobStage {
    fn from(record: JobStageRecord) -> Self {
        JobStage {
            id: record.id,
            job_id: record.job_id,
            kind: StageKind::from_str(&record.kind).unwrap_or(StageKind::OcrOld),
            status: StageStatus::from_str(&record.status).unwrap_or(StageStatus::Pending),
            expected_count: record.expected_count,
            completed_count: record.completed_count,
            failed_count: record.failed_count,
            skipped_count: record.skipped_count,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based repository for the `job_stages` table.
#[derive(Clone)]
pub struct JobStageRepository {
    pool: DbPool,
}

impl JobStageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new stage row, in `Pending` status, with its expected task count.
    pub async fn create(&self, stage: &JobStage) -> Result<()> {
        let kind = stage.kind.as_str();
        let status = stage.status.as_str();
        let created_at = stage.created_at.to_rfc3339();
        let updated_at = stage.updated_at.to_rfc3339();

        let new_stage = NewJobStage {
            id: &stage.id,
            job_id: &stage.job_id,
            kind,
            status,
            expected_count: stage.expected_count,
            completed_count: stage.completed_count,
            failed_count: stage.failed_count,
            skipped_count: stage.skipped_count,
            created_at: &created_at,
            updated_at: &updated_at,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(job_stages::table)
                .values(&new_stage)
                .execute(&mut conn)
                .await?;
        });

        Ok(())
    }

    /// Fetch a stage by (job_id, kind).
    pub async fn get(&self, job_id: &str, kind: StageKind) -> Result<Option<JobStage>> {
        let record: Option<JobStageRecord> = with_conn!(self.pool, conn => {
            job_stages::table
                .filter(job_stages::job_id.eq(job_id))
                .filter(job_stages::kind.eq(kind.as_str()))
                .first::<JobStageRecord>(&mut conn)
                .await
                .optional()?
        });

        Ok(record.map(JobStage::from))
    }

    pub async fn require(&self, job_id: &str, kind: StageKind) -> Result<JobStage> {
        self.get(job_id, kind)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("stage {job_id}/{}", kind.as_str())))
    }

    /// List every stage row for a job.
    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<JobStage>> {
        let records: Vec<JobStageRecord> = with_conn!(self.pool, conn => {
            job_stages::table
                .filter(job_stages::job_id.eq(job_id))
                .load::<JobStageRecord>(&mut conn)
                .await?
        });

        Ok(records.into_iter().map(JobStage::from).collect())
    }

    /// Move a pending stage to running.
    pub async fn mark_running(&self, job_id: &str, kind: StageKind) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                job_stages::table
                    .filter(job_stages::job_id.eq(job_id))
                    .filter(job_stages::kind.eq(kind.as_str()))
                    .filter(job_stages::status.eq(StageStatus::Pending.as_str())),
            )
            .set((
                job_stages::status.eq(StageStatus::Running.as_str()),
                job_stages::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }

    /// Bump `completed_count` by one. The caller (the Orchestrator) is
    /// responsible for only calling this once per PageTask, driven off that
    /// task's own atomic terminal transition (I6).
    pub async fn increment_completed(&self, job_id: &str, kind: StageKind) -> Result<()> {
        self.increment_column(job_id, kind, Column::Completed).await
    }

    /// Bump `failed_count` by one. See [`Self::increment_completed`].
    pub async fn increment_failed(&self, job_id: &str, kind: StageKind) -> Result<()> {
        self.increment_column(job_id, kind, Column::Failed).await
    }

    /// Bump `skipped_count` by one. See [`Self::increment_completed`].
    pub async fn increment_skipped(&self, job_id: &str, kind: StageKind) -> Result<()> {
        self.increment_column(job_id, kind, Column::Skipped).await
    }

    async fn increment_column(&self, job_id: &str, kind: StageKind, column: Column) -> Result<()> {
        let now_str = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn => {
            let target = job_stages::table
                .filter(job_stages::job_id.eq(job_id))
                .filter(job_stages::kind.eq(kind.as_str()));

            match column {
                Column::Completed => {
                    diesel::update(target)
                        .set((
                            job_stages::completed_count.eq(job_stages::completed_count + 1),
                            job_stages::updated_at.eq(&now_str),
                        ))
                        .execute(&mut conn)
                        .await?;
                }
                Column::Failed => {
                    diesel::update(target)
                        .set((
                            job_stages::failed_count.eq(job_stages::failed_count + 1),
                            job_stages::updated_at.eq(&now_str),
                        ))
                        .execute(&mut conn)
                        .await?;
                }
                Column::Skipped => {
                    diesel::update(target)
                        .set((
                            job_stages::skipped_count.eq(job_stages::skipped_count + 1),
                            job_stages::updated_at.eq(&now_str),
                        ))
                        .execute(&mut conn)
                        .await?;
                }
            }
        });

        Ok(())
    }

    /// Bump `expected_count` by `delta`, used when the summary stage grows
    /// one task at a time as each Diff PageTask completes (rather than all
    /// at once, the way the diff stage is sized after pairing).
    pub async fn increment_expected_count(&self, job_id: &str, kind: StageKind, delta: i64) -> Result<()> {
        let now_str = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn => {
            diesel::update(
                job_stages::table
                    .filter(job_stages::job_id.eq(job_id))
                    .filter(job_stages::kind.eq(kind.as_str())),
            )
            .set((
                job_stages::expected_count.eq(job_stages::expected_count + delta),
                job_stages::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?;
        });

        Ok(())
    }

    /// Reopen a stage to `running` unconditionally, used by the manual
    /// overlay / `regenerate_summary` hook (§6), which can reopen a stage
    /// that already reached a terminal status.
    pub async fn reopen(&self, job_id: &str, kind: StageKind) -> Result<()> {
        let now_str = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn => {
            diesel::update(
                job_stages::table
                    .filter(job_stages::job_id.eq(job_id))
                    .filter(job_stages::kind.eq(kind.as_str())),
            )
            .set((
                job_stages::status.eq(StageStatus::Running.as_str()),
                job_stages::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?;
        });

        Ok(())
    }

    /// Set the expected task count once the stage's tasks have been enumerated.
    pub async fn set_expected_count(&self, job_id: &str, kind: StageKind, expected: i64) -> Result<()> {
        let now_str = Utc::now().to_rfc3339();

        with_conn!(self.pool, conn => {
            diesel::update(
                job_stages::table
                    .filter(job_stages::job_id.eq(job_id))
                    .filter(job_stages::kind.eq(kind.as_str())),
            )
            .set((
                job_stages::expected_count.eq(expected),
                job_stages::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?;
        });

        Ok(())
    }

    /// Move a quiescent stage into its terminal status (I2). Idempotent:
    /// once the stage is already terminal, this is a no-op.
    pub async fn mark_terminal(&self, job_id: &str, kind: StageKind, status: StageStatus) -> Result<bool> {
        let now_str = Utc::now().to_rfc3339();
        let status_str = status.as_str();

        let rows: usize = with_conn!(self.pool, conn => {
            diesel::update(
                job_stages::table
                    .filter(job_stages::job_id.eq(job_id))
                    .filter(job_stages::kind.eq(kind.as_str()))
                    .filter(
                        job_stages::status
                            .ne(StageStatus::Completed.as_str())
                            .and(job_stages::status.ne(StageStatus::PartiallyCompleted.as_str()))
                            .and(job_stages::status.ne(StageStatus::Failed.as_str()))
                            .and(job_stages::status.ne(StageStatus::Skipped.as_str())),
                    ),
            )
            .set((
                job_stages::status.eq(status_str),
                job_stages::updated_at.eq(&now_str),
            ))
            .execute(&mut conn)
            .await?
        });

        Ok(rows > 0)
    }
}

enum Column {
    Completed,
    Failed,
    Skipped,
}
