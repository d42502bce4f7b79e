//! Thin API surface over the Orchestrator (spec §6): job creation, progress
//! polling, cancellation, and the manual-overlay regenerate hook.
//!
//! This is not a transport layer — no HTTP/gRPC framing — just the
//! operations a CLI or a future HTTP handler calls directly against a
//! `DieselDbContext` + `Orchestrator<B>` pair.

use uuid::Uuid;

use crate::bus::MessageBus;
use crate::models::{DiffResult, Job, JobStage, PageResult};
use crate::orchestrator::{Orchestrator, Result};
use crate::repository::{DieselDbContext, RepositoryError};

/// Per-stage progress counters, as returned by [`get_job_progress`].
#[derive(Debug, Clone)]
pub struct StageProgress {
    pub stage: JobStage,
}

/// A Job plus its four stages, for a single progress snapshot.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub job: Job,
    pub stages: Vec<JobStage>,
}

/// Create a Job row in `queued` status and hand it to the Orchestrator to
/// size and dispatch. Returns the new job id.
pub async fn start_job<B: MessageBus>(
    orchestrator: &Orchestrator<B>,
    db: &DieselDbContext,
    project_id: &str,
    old_version_id: &str,
    new_version_id: &str,
    created_by: &str,
) -> Result<String> {
    let job = Job::new(
        Uuid::new_v4().to_string(),
        project_id.to_string(),
        old_version_id.to_string(),
        new_version_id.to_string(),
        created_by.to_string(),
    );
    db.jobs().create(&job).await?;
    orchestrator.start_job(&job.id).await?;
    Ok(job.id)
}

/// A job's current status plus its per-stage counters, for polling clients.
pub async fn get_job_progress(db: &DieselDbContext, job_id: &str) -> Result<JobProgress> {
    let job = db.jobs().require(job_id).await?;
    let stages = db.job_stages().list_for_job(job_id).await?;
    Ok(JobProgress { job, stages })
}

/// Every page result produced so far for a job, across both drawing versions.
pub async fn list_page_results(db: &DieselDbContext, job_id: &str) -> Result<Vec<PageResult>> {
    Ok(db.page_results().list_for_job(job_id).await?)
}

/// Every diff result produced so far for a job.
pub async fn list_diff_results(db: &DieselDbContext, job_id: &str) -> Result<Vec<DiffResult>> {
    Ok(db.diff_results().list_for_job(job_id).await?)
}

/// The latest change summary for one diff result, if any worker has
/// completed it yet.
pub async fn get_latest_summary(
    db: &DieselDbContext,
    diff_result_id: &str,
) -> std::result::Result<Option<crate::models::ChangeSummary>, RepositoryError> {
    db.change_summaries().get_latest_for_diff_result(diff_result_id).await
}

/// Cancel a running job (spec §4.1/§6).
pub async fn cancel_job<B: MessageBus>(orchestrator: &Orchestrator<B>, job_id: &str) -> Result<()> {
    orchestrator.cancel_job(job_id).await
}

/// Re-run summarization for one diff result, reopening its stage and job if
/// they'd already reached a terminal status (spec §6).
pub async fn regenerate_summary<B: MessageBus>(orchestrator: &Orchestrator<B>, diff_result_id: &str) -> Result<()> {
    orchestrator.regenerate_summary(diff_result_id).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::LocalBus;
    use crate::config::Settings;
    use crate::models::{DrawingVersion, Project};

    async fn setup() -> (Orchestrator<LocalBus>, DieselDbContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = DieselDbContext::new(&dir.path().join("test.db"), &dir.path().join("storage"));
        db.init_schema().await.unwrap();
        let orchestrator = Orchestrator::new(db.clone(), Arc::new(LocalBus::default()), Settings::default());
        (orchestrator, db, dir)
    }

    #[tokio::test]
    async fn start_job_creates_a_queued_job_and_sizes_its_stages() {
        let (orch, db, _dir) = setup().await;

        let project = Project::new(Uuid::new_v4().to_string(), "user-1".into(), "Tower A".into());
        db.projects().create(&project).await.unwrap();
        let old = DrawingVersion::new(Uuid::new_v4().to_string(), project.id.clone(), "drawings/old/raw.pdf".into(), 2);
        let new = DrawingVersion::new(Uuid::new_v4().to_string(), project.id.clone(), "drawings/new/raw.pdf".into(), 2);
        db.drawing_versions().create(&old).await.unwrap();
        db.drawing_versions().create(&new).await.unwrap();

        let job_id = start_job(&orch, &db, &project.id, &old.id, &new.id, "user-1").await.unwrap();

        let progress = get_job_progress(&db, &job_id).await.unwrap();
        assert_eq!(progress.stages.len(), 4);
        assert_eq!(progress.job.status, crate::models::JobStatus::Running);
    }
}
