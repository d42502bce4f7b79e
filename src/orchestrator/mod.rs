//! Orchestrator: the state machine that drives a Job through its four
//! stages (spec §4.1).
//!
//! Workers own their result rows (`PageResult`/`DiffResult`/`ChangeSummary`)
//! directly; the Orchestrator never writes them. It owns `Job`, `JobStage`,
//! and `PageTask` rows exclusively, and reads result rows only to build the
//! next stage's task set (pairing) or to look up an id to hand to a worker
//! (e.g. a diff result id on a Summary task).

pub mod pairing;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::bus::messages::{CompletionMessage, CompletionStatus, TaskMessage, TaskPayload};
use crate::bus::{self, BusError, MessageBus};
use crate::config::Settings;
use crate::models::{JobStatus, PageTask, StageKind, StageStatus, TaskErrorKind};
use crate::repository::{DieselDbContext, RepositoryError};
use crate::storage;

use pairing::PageNameEntry;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("job {0} is not in queued status")]
    JobNotQueued(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Drives Jobs through OCR → pairing → Diff → Summary over an injected
/// message bus (Design Note 9: explicit handles, no global dispatcher).
pub struct Orchestrator<B: MessageBus> {
    db: DieselDbContext,
    bus: Arc<B>,
    settings: Settings,
}

impl<B: MessageBus> Orchestrator<B> {
    pub fn new(db: DieselDbContext, bus: Arc<B>, settings: Settings) -> Self {
        Self { db, bus, settings }
    }

    /// Start a queued job: size and publish both OCR stages.
    ///
    /// Idempotent — a second call for a job whose stages already exist is a
    /// no-op, so a retried API request or a redelivered start event can't
    /// double-publish OCR tasks.
    pub async fn start_job(&self, job_id: &str) -> Result<()> {
        if !self.db.job_stages().list_for_job(job_id).await?.is_empty() {
            tracing::debug!(job_id, "start_job is a no-op: stages already exist");
            return Ok(());
        }

        let job = self.db.jobs().require(job_id).await?;
        if job.status != JobStatus::Queued {
            return Err(OrchestratorError::JobNotQueued(job_id.to_string()));
        }

        let old_version = self.db.drawing_versions().get(&job.old_version_id).await?;
        let new_version = self.db.drawing_versions().get(&job.new_version_id).await?;

        let (old_version, new_version) = match (old_version, new_version) {
            (Some(old), Some(new)) => (old, new),
            _ => {
                tracing::error!(job_id, "precondition fault: drawing version missing; failing job with no task publication");
                self.create_all_skipped_stages(job_id).await?;
                self.db.jobs().mark_terminal(job_id, JobStatus::Failed).await?;
                return Ok(());
            }
        };

        if old_version.page_count == 0 && new_version.page_count == 0 {
            tracing::error!(job_id, "precondition fault: both drawing versions have zero pages");
            self.create_all_skipped_stages(job_id).await?;
            self.db.jobs().mark_terminal(job_id, JobStatus::Failed).await?;
            return Ok(());
        }

        self.create_stage(job_id, StageKind::OcrOld, old_version.page_count as i64).await?;
        self.create_stage(job_id, StageKind::OcrNew, new_version.page_count as i64).await?;
        self.create_stage(job_id, StageKind::Diff, 0).await?;
        self.create_stage(job_id, StageKind::Summary, 0).await?;

        self.db.job_stages().mark_running(job_id, StageKind::OcrOld).await?;
        self.db.job_stages().mark_running(job_id, StageKind::OcrNew).await?;
        self.db.jobs().mark_running(job_id).await?;

        for page_index in 0..old_version.page_count {
            self.dispatch_ocr_task(&job, StageKind::OcrOld, &old_version.id, &old_version.storage_ref, page_index)
                .await?;
        }
        for page_index in 0..new_version.page_count {
            self.dispatch_ocr_task(&job, StageKind::OcrNew, &new_version.id, &new_version.storage_ref, page_index)
                .await?;
        }

        Ok(())
    }

    async fn create_stage(&self, job_id: &str, kind: StageKind, expected_count: i64) -> Result<()> {
        let mut stage = crate::models::JobStage::new(Uuid::new_v4().to_string(), job_id.to_string(), kind);
        stage.expected_count = expected_count;
        self.db.job_stages().create(&stage).await?;
        Ok(())
    }

    /// Precondition-fault path: every Job has exactly one JobStage per kind
    /// at every quiescent point (I1), even a job that never dispatches a
    /// single task.
    async fn create_all_skipped_stages(&self, job_id: &str) -> Result<()> {
        for kind in StageKind::ALL {
            self.create_stage(job_id, kind, 0).await?;
            self.db.job_stages().mark_terminal(job_id, kind, StageStatus::Skipped).await?;
        }
        Ok(())
    }

    async fn dispatch_ocr_task(
        &self,
        job: &crate::models::Job,
        stage_kind: StageKind,
        drawing_version_id: &str,
        storage_ref: &str,
        page_index: i32,
    ) -> Result<()> {
        let task = PageTask::new_ocr(
            Uuid::new_v4().to_string(),
            job.id.clone(),
            stage_kind,
            drawing_version_id.to_string(),
            page_index,
        );
        self.db.page_tasks().create(&task).await?;

        let msg = TaskMessage::new(
            task.id.clone(),
            job.id.clone(),
            TaskPayload::Ocr {
                drawing_version_id: drawing_version_id.to_string(),
                page_index,
                storage_ref: storage_ref.to_string(),
            },
        );
        bus::publish_task(self.bus.as_ref(), &msg).await?;
        Ok(())
    }

    /// Handle one worker completion event (spec §4.1 "on_completion").
    ///
    /// Discards silently (after the idempotent PageTask transition) if the
    /// event refers to an unknown or already-terminal task — P3.
    pub async fn on_completion(&self, event: &CompletionMessage) -> Result<()> {
        let Some(task) = self.db.page_tasks().get(&event.page_task_id).await? else {
            tracing::warn!(page_task_id = %event.page_task_id, "completion for unknown page task; discarding");
            return Ok(());
        };

        match event.status {
            CompletionStatus::Completed => self.handle_completed(&task).await,
            CompletionStatus::Failed => self.handle_failed(&task, event).await,
        }
    }

    async fn handle_completed(&self, task: &PageTask) -> Result<()> {
        if !self.db.page_tasks().mark_completed(&task.id).await? {
            tracing::debug!(task_id = %task.id, "duplicate completion; discarding");
            return Ok(());
        }
        self.db.job_stages().increment_completed(&task.job_id, task.stage_kind).await?;

        match task.stage_kind {
            StageKind::OcrOld | StageKind::OcrNew => self.maybe_close_ocr_stage(&task.job_id, task.stage_kind).await?,
            StageKind::Diff => self.on_diff_succeeded(task).await?,
            StageKind::Summary => {}
        }

        self.try_finalize(&task.job_id).await
    }

    async fn handle_failed(&self, task: &PageTask, event: &CompletionMessage) -> Result<()> {
        let kind = event.error_kind.unwrap_or(TaskErrorKind::PreconditionMissing);
        let message = event
            .error_message
            .as_deref()
            .unwrap_or("worker reported failure without a message");

        if kind.is_retryable() && task.can_retry(self.settings.attempt_cap as i32) {
            let backoff = self.backoff_for(task.attempt_count);
            let settled = self
                .db
                .page_tasks()
                .schedule_retry(&task.id, kind, message, Utc::now() + backoff)
                .await?;
            if settled {
                tracing::warn!(task_id = %task.id, kind = %kind.as_str(), attempt = task.attempt_count, "scheduling retry");
            }
            return Ok(());
        }

        if !self.db.page_tasks().mark_failed(&task.id, kind, message).await? {
            tracing::debug!(task_id = %task.id, "duplicate failure event; discarding");
            return Ok(());
        }
        self.db.job_stages().increment_failed(&task.job_id, task.stage_kind).await?;

        if matches!(task.stage_kind, StageKind::OcrOld | StageKind::OcrNew) {
            self.maybe_close_ocr_stage(&task.job_id, task.stage_kind).await?;
        }

        self.try_finalize(&task.job_id).await
    }

    fn backoff_for(&self, attempt_count: i32) -> chrono::Duration {
        let exponent = (attempt_count.max(1) - 1).min(6) as u32;
        let millis = self.settings.base_backoff_ms.saturating_mul(1u64 << exponent);
        chrono::Duration::milliseconds(millis as i64)
    }

    /// Close one OCR stage if it's quiescent, then run pairing once both
    /// OCR stages are terminal.
    async fn maybe_close_ocr_stage(&self, job_id: &str, kind: StageKind) -> Result<()> {
        let stage = self.db.job_stages().require(job_id, kind).await?;
        if stage.is_quiescent() && !stage.status.is_terminal() {
            self.db.job_stages().mark_terminal(job_id, kind, stage.terminal_status()).await?;
        }

        let ocr_old = self.db.job_stages().require(job_id, StageKind::OcrOld).await?;
        let ocr_new = self.db.job_stages().require(job_id, StageKind::OcrNew).await?;
        if ocr_old.status.is_terminal() && ocr_new.status.is_terminal() {
            self.run_pairing(job_id).await?;
        }
        Ok(())
    }

    async fn run_pairing(&self, job_id: &str) -> Result<()> {
        let job = self.db.jobs().require(job_id).await?;

        let old_results = self.db.page_results().list_for_version(&job.old_version_id).await?;
        let new_results = self.db.page_results().list_for_version(&job.new_version_id).await?;

        let old_entries: Vec<PageNameEntry> = old_results
            .iter()
            .map(|r| PageNameEntry { page_index: r.page_index, drawing_name: r.drawing_name.clone() })
            .collect();
        let new_entries: Vec<PageNameEntry> = new_results
            .iter()
            .map(|r| PageNameEntry { page_index: r.page_index, drawing_name: r.drawing_name.clone() })
            .collect();

        let resolved = pairing::resolve_pairs(&old_entries, &new_entries);
        self.db
            .jobs()
            .set_unmatched_names(job_id, &resolved.unmatched_old_names, &resolved.unmatched_new_names)
            .await?;

        if resolved.pairs.is_empty() {
            tracing::warn!(job_id, "zero matched pages; diff and summary stages skipped");
            self.db.job_stages().mark_terminal(job_id, StageKind::Diff, StageStatus::Skipped).await?;
            self.db.job_stages().mark_terminal(job_id, StageKind::Summary, StageStatus::Skipped).await?;
            self.db.jobs().mark_terminal(job_id, JobStatus::Failed).await?;
            return Ok(());
        }

        self.db
            .job_stages()
            .set_expected_count(job_id, StageKind::Diff, resolved.pairs.len() as i64)
            .await?;
        self.db.job_stages().mark_running(job_id, StageKind::Diff).await?;

        for pair in &resolved.pairs {
            let task = PageTask::new_pair(
                Uuid::new_v4().to_string(),
                job_id.to_string(),
                StageKind::Diff,
                pair.drawing_name.clone(),
                pair.old_page_index,
                pair.new_page_index,
            );
            self.db.page_tasks().create(&task).await?;

            let old_ref = self
                .db
                .page_results()
                .get_by_page(&job.old_version_id, pair.old_page_index)
                .await?
                .map(|r| r.image_ref)
                .unwrap_or_default();
            let new_ref = self
                .db
                .page_results()
                .get_by_page(&job.new_version_id, pair.new_page_index)
                .await?
                .map(|r| r.image_ref)
                .unwrap_or_default();

            let msg = TaskMessage::new(
                task.id.clone(),
                job_id.to_string(),
                TaskPayload::Diff {
                    drawing_name: pair.drawing_name.clone(),
                    old_page_result_ref: old_ref,
                    new_page_result_ref: new_ref,
                },
            );
            bus::publish_task(self.bus.as_ref(), &msg).await?;
        }

        Ok(())
    }

    /// On a successful Diff completion, create exactly one Summary task for
    /// that pair (spec §4.1), regardless of whether the diff detected a
    /// change — an unchanged pair still needs a summary saying so.
    async fn on_diff_succeeded(&self, task: &PageTask) -> Result<()> {
        let drawing_name = task.drawing_name.clone().unwrap_or_default();
        let diff_result = self.db.diff_results().require_by_drawing(&task.job_id, &drawing_name).await?;

        let summary_task = PageTask::new_summary(Uuid::new_v4().to_string(), task.job_id.clone(), drawing_name);
        self.db.page_tasks().create(&summary_task).await?;
        self.db
            .job_stages()
            .increment_expected_count(&task.job_id, StageKind::Summary, 1)
            .await?;
        self.db.job_stages().mark_running(&task.job_id, StageKind::Summary).await?;

        let msg = TaskMessage::new(
            summary_task.id.clone(),
            task.job_id.clone(),
            TaskPayload::Summary { diff_result_id: diff_result.id.clone() },
        );
        bus::publish_task(self.bus.as_ref(), &msg).await?;

        // The diff stage itself may now be quiescent (this was its last task).
        let diff_stage = self.db.job_stages().require(&task.job_id, StageKind::Diff).await?;
        if diff_stage.is_quiescent() && !diff_stage.status.is_terminal() {
            self.db
                .job_stages()
                .mark_terminal(&task.job_id, StageKind::Diff, diff_stage.terminal_status())
                .await?;
        }
        Ok(())
    }

    /// Close every stage that's become quiescent, and finalize the Job per
    /// I3 once all four are terminal. Safe to call after any completion;
    /// a no-op while stages remain open.
    async fn try_finalize(&self, job_id: &str) -> Result<()> {
        let mut stages = self.db.job_stages().list_for_job(job_id).await?;
        if stages.len() < StageKind::ALL.len() {
            return Ok(());
        }

        for stage in &stages {
            if !stage.status.is_terminal() && stage.is_quiescent() {
                self.db.job_stages().mark_terminal(job_id, stage.kind, stage.terminal_status()).await?;
            }
        }
        stages = self.db.job_stages().list_for_job(job_id).await?;
        if !stages.iter().all(|s| s.status.is_terminal()) {
            return Ok(());
        }

        let diff_results = self.db.diff_results().list_for_job(job_id).await?;
        let mut any_summary = false;
        for diff_result in &diff_results {
            if self.db.change_summaries().get_latest_for_diff_result(&diff_result.id).await?.is_some() {
                any_summary = true;
                break;
            }
        }

        let any_failures = stages.iter().any(|s| s.failed_count > 0);
        let status = if !any_failures && !diff_results.is_empty() && any_summary {
            JobStatus::Completed
        } else if stages.iter().any(|s| s.expected_count > 0 && s.completed_count == 0) {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyFailed
        };

        self.db.jobs().mark_terminal(job_id, status).await?;
        tracing::info!(job_id, status = status.as_str(), "job finalized");
        Ok(())
    }

    /// Cancel a job: every non-terminal task is cancelled and the job is
    /// moved straight to its terminal `failed` status (this crate's status
    /// enum has no distinct "cancelled" value — see DESIGN.md). In-flight
    /// workers are not interrupted; their eventual completions find an
    /// already-terminal PageTask and are discarded by `on_completion`'s
    /// normal idempotence check. Late worker output should be written to
    /// [`storage::discarded_path`] rather than the live overlay/summary path.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let cancelled = self.db.page_tasks().cancel_all_for_job(job_id).await?;
        self.db.jobs().mark_terminal(job_id, JobStatus::Failed).await?;
        tracing::info!(job_id, cancelled, "job cancelled");
        Ok(())
    }

    /// Where a cancelled job's worker output should land instead of the
    /// live overlay/summary path, given this context's storage root.
    pub fn discarded_output_path(&self, job_id: &str, page_task_id: &str) -> std::path::PathBuf {
        storage::discarded_path(self.db.storage_root(), job_id, page_task_id)
    }

    /// Manual-overlay hook (spec §6): append one new Summary task for a
    /// diff result whose summary stage (and possibly job) already reached
    /// a terminal status, reopening both until the new summary completes.
    pub async fn regenerate_summary(&self, diff_result_id: &str) -> Result<()> {
        let diff_result = self
            .db
            .diff_results()
            .get(diff_result_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("diff result {diff_result_id}")))?;

        let task = PageTask::new_summary(
            Uuid::new_v4().to_string(),
            diff_result.job_id.clone(),
            diff_result.drawing_name.clone(),
        );
        self.db.page_tasks().create(&task).await?;
        self.db
            .job_stages()
            .increment_expected_count(&diff_result.job_id, StageKind::Summary, 1)
            .await?;
        self.db.job_stages().reopen(&diff_result.job_id, StageKind::Summary).await?;
        self.db.jobs().reopen_running(&diff_result.job_id).await?;

        let msg = TaskMessage::new(
            task.id.clone(),
            diff_result.job_id.clone(),
            TaskPayload::Summary { diff_result_id: diff_result.id.clone() },
        );
        bus::publish_task(self.bus.as_ref(), &msg).await?;
        Ok(())
    }

    /// Republish every currently-dispatchable (pending, backoff-elapsed)
    /// task for one stage. Not called automatically from `on_completion` —
    /// a scheduled retry waits out its backoff in the store, and a separate
    /// sweep (a periodic CLI/worker-pool call) is what actually redelivers
    /// it over the bus, keeping retry timing decoupled from completion
    /// handling.
    pub async fn redispatch_pending(&self, job_id: &str, stage_kind: StageKind) -> Result<usize> {
        let job = self.db.jobs().require(job_id).await?;
        let tasks = self.db.page_tasks().list_dispatchable(job_id, stage_kind).await?;

        for task in &tasks {
            let msg = self.build_task_message(&job, task).await?;
            bus::publish_task(self.bus.as_ref(), &msg).await?;
        }
        Ok(tasks.len())
    }

    async fn build_task_message(&self, job: &crate::models::Job, task: &PageTask) -> Result<TaskMessage> {
        let payload = match task.stage_kind {
            StageKind::OcrOld | StageKind::OcrNew => {
                let drawing_version_id = task.drawing_version_id.clone().unwrap_or_default();
                let version = self.db.drawing_versions().require(&drawing_version_id).await?;
                TaskPayload::Ocr {
                    drawing_version_id,
                    page_index: task.page_index.unwrap_or(0),
                    storage_ref: version.storage_ref,
                }
            }
            StageKind::Diff => {
                let drawing_name = task.drawing_name.clone().unwrap_or_default();
                let old_ref = self
                    .db
                    .page_results()
                    .get_by_page(&job.old_version_id, task.old_page_index.unwrap_or(0))
                    .await?
                    .map(|r| r.image_ref)
                    .unwrap_or_default();
                let new_ref = self
                    .db
                    .page_results()
                    .get_by_page(&job.new_version_id, task.new_page_index.unwrap_or(0))
                    .await?
                    .map(|r| r.image_ref)
                    .unwrap_or_default();
                TaskPayload::Diff { drawing_name, old_page_result_ref: old_ref, new_page_result_ref: new_ref }
            }
            StageKind::Summary => {
                let drawing_name = task.drawing_name.clone().unwrap_or_default();
                let diff_result = self.db.diff_results().require_by_drawing(&job.id, &drawing_name).await?;
                TaskPayload::Summary { diff_result_id: diff_result.id }
            }
        };

        Ok(TaskMessage::new(task.id.clone(), job.id.clone(), payload))
    }
}
