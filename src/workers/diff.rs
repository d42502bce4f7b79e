//! Diff Worker (spec §4.4): aligns one matched pair of pages and writes the overlay.
//!
//! Reads both sides' `PageResult` rows via `old_page_result_ref`/
//! `new_page_result_ref` on the task message, then writes exactly one
//! `DiffResult` row keyed by `(job_id, drawing_name)` before publishing its
//! completion.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{relative_key, AlignmentOutcome, PageAligner, Result};
use crate::bus::messages::{CompletionMessage, CompletionOutputs, TaskMessage, TaskPayload};
use crate::bus::{self, MessageBus};
use crate::config::Settings;
use crate::models::{DiffResult, TaskErrorKind};
use crate::repository::diesel_context::DieselDbContext;
use crate::storage;

pub struct DiffWorker<B: MessageBus> {
    db: DieselDbContext,
    bus: Arc<B>,
    settings: Settings,
    aligner: Arc<dyn PageAligner>,
}

impl<B: MessageBus + 'static> DiffWorker<B> {
    pub fn new(db: DieselDbContext, bus: Arc<B>, settings: Settings, aligner: Arc<dyn PageAligner>) -> Self {
        Self { db, bus, settings, aligner }
    }

    pub async fn run(&self) -> Result<()> {
        let mut subscription = self.bus.subscribe("tasks.diff").await?;

        while let Some(delivery) = subscription.recv().await {
            let task: TaskMessage = match serde_json::from_slice(&delivery.payload) {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!(error = %err, "failed to decode diff task message; dropping");
                    delivery.ack.ack().await?;
                    continue;
                }
            };

            match self.process_one(&task).await {
                Ok(()) => delivery.ack.ack().await?,
                Err(err) => {
                    tracing::error!(page_task_id = %task.page_task_id, error = %err, "diff worker failed; nacking for redelivery");
                    delivery.ack.nack().await?;
                }
            }
        }

        Ok(())
    }

    pub async fn process_one(&self, task: &TaskMessage) -> Result<()> {
        let TaskPayload::Diff { drawing_name, old_page_result_ref, new_page_result_ref } = &task.payload else {
            tracing::warn!(page_task_id = %task.page_task_id, "diff worker received a non-diff task; discarding");
            return Ok(());
        };

        if !self.db.page_tasks().claim(&task.page_task_id).await? {
            tracing::debug!(page_task_id = %task.page_task_id, "task already claimed or terminal; discarding redelivery");
            return Ok(());
        }

        let old_image = match read_file(&self.db.storage_root().join(old_page_result_ref)) {
            Ok(bytes) => bytes,
            Err(err) => return self.publish_failure(task, TaskErrorKind::PreconditionMissing, &err.to_string()).await,
        };
        let new_image = match read_file(&self.db.storage_root().join(new_page_result_ref)) {
            Ok(bytes) => bytes,
            Err(err) => return self.publish_failure(task, TaskErrorKind::PreconditionMissing, &err.to_string()).await,
        };

        let aligner = self.aligner.clone();
        let old_image_for_align = old_image.clone();
        let new_image_for_align = new_image.clone();
        let budget = Duration::from_secs(self.settings.diff_budget_secs);

        let work = tokio::task::spawn_blocking(move || aligner.align(&old_image_for_align, &new_image_for_align));

        let outcome: AlignmentOutcome = match tokio::time::timeout(budget, work).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(kind))) => return self.publish_failure(task, kind, "diff backend failed to align pages").await,
            Ok(Err(join_err)) => {
                return self.publish_failure(task, TaskErrorKind::AlignmentFailed, &join_err.to_string()).await;
            }
            Err(_elapsed) => return self.publish_failure(task, TaskErrorKind::AlignmentFailed, "diff budget exceeded").await,
        };

        let overlay_path = storage::overlay_path(self.db.storage_root(), &task.job_id, drawing_name);
        if let Err(err) = write_file(&overlay_path, &outcome.overlay_bytes) {
            return self.publish_failure(task, TaskErrorKind::OverlayIoError, &err.to_string()).await;
        }

        let result = DiffResult {
            id: Uuid::new_v4().to_string(),
            job_id: task.job_id.clone(),
            drawing_name: drawing_name.clone(),
            old_image_ref: old_page_result_ref.clone(),
            new_image_ref: new_page_result_ref.clone(),
            overlay_ref: relative_key(self.db.storage_root(), &overlay_path),
            alignment_score: outcome.alignment_score,
            change_detected: outcome.change_detected,
            change_count: outcome.change_count,
            created_at: Utc::now(),
        };
        self.db.diff_results().create(&result).await?;

        let completion = CompletionMessage::success(
            task.page_task_id.clone(),
            task.job_id.clone(),
            CompletionOutputs::Diff {
                overlay_ref: Some(result.overlay_ref.clone()),
                alignment_score: Some(result.alignment_score),
                change_detected: Some(result.change_detected),
                change_count: result.change_count,
            },
        );
        bus::publish_completion(self.bus.as_ref(), &completion).await?;
        Ok(())
    }

    async fn publish_failure(&self, task: &TaskMessage, kind: TaskErrorKind, message: &str) -> Result<()> {
        let completion = CompletionMessage::failure(
            task.page_task_id.clone(),
            task.job_id.clone(),
            kind,
            message,
            CompletionOutputs::Diff {
                overlay_ref: None,
                alignment_score: None,
                change_detected: None,
                change_count: None,
            },
        );
        bus::publish_completion(self.bus.as_ref(), &completion).await?;
        Ok(())
    }
}

fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    std::fs::read(path)
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::bus::LocalBus;
    use crate::models::{PageTask, StageKind};
    use crate::workers::DeterministicAligner;

    async fn setup() -> (DieselDbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DieselDbContext::new(&dir.path().join("test.db"), dir.path());
        db.init_schema().await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn process_one_writes_diff_result_and_publishes_success() {
        let (db, _dir) = setup().await;
        let bus = Arc::new(LocalBus::default());
        let worker = DiffWorker::new(db.clone(), bus.clone(), Settings::default(), Arc::new(DeterministicAligner));

        let old_ref = "drawings/old-1/pages/0.png";
        let new_ref = "drawings/new-1/pages/0.png";
        write_file(&db.storage_root().join(old_ref), b"old-bytes").unwrap();
        write_file(&db.storage_root().join(new_ref), b"new-bytes").unwrap();

        let task_row = PageTask::new_pair("task-1".into(), "job-1".into(), StageKind::Diff, "A-101".into(), 0, 0);
        db.page_tasks().create(&task_row).await.unwrap();

        let message = TaskMessage::new(
            "task-1",
            "job-1",
            TaskPayload::Diff {
                drawing_name: "A-101".into(),
                old_page_result_ref: old_ref.into(),
                new_page_result_ref: new_ref.into(),
            },
        );
        worker.process_one(&message).await.unwrap();

        let result = db.diff_results().require_by_drawing("job-1", "A-101").await.unwrap();
        assert!(result.change_detected);
    }

    #[tokio::test]
    async fn missing_page_result_file_publishes_a_failure_completion() {
        let (db, _dir) = setup().await;
        let bus = Arc::new(LocalBus::default());
        let worker = DiffWorker::new(db.clone(), bus.clone(), Settings::default(), Arc::new(DeterministicAligner));

        let task_row = PageTask::new_pair("task-1".into(), "job-1".into(), StageKind::Diff, "A-101".into(), 0, 0);
        db.page_tasks().create(&task_row).await.unwrap();

        let mut completions = bus.subscribe(CompletionMessage::TOPIC).await.unwrap();
        let message = TaskMessage::new(
            "task-1",
            "job-1",
            TaskPayload::Diff {
                drawing_name: "A-101".into(),
                old_page_result_ref: "drawings/missing/pages/0.png".into(),
                new_page_result_ref: "drawings/missing/pages/1.png".into(),
            },
        );
        worker.process_one(&message).await.unwrap();

        let delivery = completions.recv().await.unwrap();
        let completion: CompletionMessage = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(completion.status, crate::bus::messages::CompletionStatus::Failed);
        assert_eq!(completion.error_kind, Some(TaskErrorKind::PreconditionMissing));
    }
}
