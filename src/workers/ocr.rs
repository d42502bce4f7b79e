//! OCR Worker (spec §4.2): rasterizes one page and extracts its drawing name.
//!
//! Writes exactly one `PageResult` row before publishing its completion —
//! the Orchestrator's pairing step (§4.3) reads that row back, it never
//! carries the extracted name on the wire itself beyond the completion's
//! `drawing_name` field used for progress reporting.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{relative_key, DrawingNameExtractor, Rasterizer, Result, WorkerEvent};
use crate::bus::messages::{CompletionMessage, CompletionOutputs, TaskMessage, TaskPayload};
use crate::bus::{self, MessageBus};
use crate::config::Settings;
use crate::models::{PageResult, TaskErrorKind};
use crate::repository::diesel_context::DieselDbContext;
use crate::storage;

/// Batch size for the `process` driver, scaled by worker count the way the
/// teacher's `OcrService::process` batches its phases.
const BATCH_FACTOR: usize = 4;

pub struct OcrWorker<B: MessageBus> {
    db: DieselDbContext,
    bus: Arc<B>,
    settings: Settings,
    rasterizer: Arc<dyn Rasterizer>,
    extractor: Arc<dyn DrawingNameExtractor>,
}

impl<B: MessageBus + 'static> OcrWorker<B> {
    pub fn new(
        db: DieselDbContext,
        bus: Arc<B>,
        settings: Settings,
        rasterizer: Arc<dyn Rasterizer>,
        extractor: Arc<dyn DrawingNameExtractor>,
    ) -> Self {
        Self { db, bus, settings, rasterizer, extractor }
    }

    /// Subscribe to `tasks.ocr` and process deliveries until the bus closes.
    pub async fn run(&self) -> Result<()> {
        let mut subscription = self.bus.subscribe("tasks.ocr").await?;

        while let Some(delivery) = subscription.recv().await {
            let task: TaskMessage = match serde_json::from_slice(&delivery.payload) {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!(error = %err, "failed to decode ocr task message; dropping");
                    delivery.ack.ack().await?;
                    continue;
                }
            };

            match self.process_one(&task).await {
                Ok(()) => delivery.ack.ack().await?,
                Err(err) => {
                    tracing::error!(page_task_id = %task.page_task_id, error = %err, "ocr worker failed; nacking for redelivery");
                    delivery.ack.nack().await?;
                }
            }
        }

        Ok(())
    }

    /// Claim, rasterize, extract, persist, and report completion for one
    /// OCR task. Returns `Ok(())` both on success and on a business-level
    /// failure already reported via a `CompletionMessage::failure` — only
    /// bus/repository errors propagate.
    pub async fn process_one(&self, task: &TaskMessage) -> Result<()> {
        let TaskPayload::Ocr { drawing_version_id, page_index, storage_ref } = &task.payload else {
            tracing::warn!(page_task_id = %task.page_task_id, "ocr worker received a non-ocr task; discarding");
            return Ok(());
        };

        if !self.db.page_tasks().claim(&task.page_task_id).await? {
            tracing::debug!(page_task_id = %task.page_task_id, "task already claimed or terminal; discarding redelivery");
            return Ok(());
        }

        let rasterizer = self.rasterizer.clone();
        let extractor = self.extractor.clone();
        let storage_ref_owned = storage_ref.clone();
        let page_index = *page_index;
        let dpi = self.settings.ocr_dpi;

        let budget = Duration::from_secs(self.settings.ocr_budget_secs);
        let work = tokio::task::spawn_blocking(move || {
            let image = rasterizer.rasterize(&storage_ref_owned, page_index, dpi)?;
            let drawing_name = extractor.extract(&storage_ref_owned, page_index, &image);
            Ok::<_, TaskErrorKind>((image, drawing_name))
        });

        let (image, drawing_name) = match tokio::time::timeout(budget, work).await {
            Ok(Ok(Ok(pair))) => pair,
            Ok(Ok(Err(kind))) => {
                return self.publish_failure(task, kind, "ocr backend failed to rasterize or extract").await;
            }
            Ok(Err(join_err)) => {
                return self.publish_failure(task, TaskErrorKind::RasterizationError, &join_err.to_string()).await;
            }
            Err(_elapsed) => {
                return self.publish_failure(task, TaskErrorKind::RasterizationError, "ocr budget exceeded").await;
            }
        };

        let raster_path = storage::page_raster_path(self.db.storage_root(), drawing_version_id, page_index);
        if let Err(err) = write_file(&raster_path, &image) {
            return self.publish_failure(task, TaskErrorKind::OverlayIoError, &err.to_string()).await;
        }

        let result = PageResult {
            id: Uuid::new_v4().to_string(),
            job_id: task.job_id.clone(),
            drawing_version_id: drawing_version_id.clone(),
            page_index,
            image_ref: relative_key(self.db.storage_root(), &raster_path),
            drawing_name: drawing_name.clone(),
            extracted_metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        self.db.page_results().create(&result).await?;

        let completion = CompletionMessage::success(
            task.page_task_id.clone(),
            task.job_id.clone(),
            CompletionOutputs::Ocr { drawing_name },
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
            CompletionOutputs::Ocr { drawing_name: None },
        );
        bus::publish_completion(self.bus.as_ref(), &completion).await?;
        Ok(())
    }

    /// Drain up to `limit` dispatchable OCR tasks for `job_id`/`stage` directly
    /// against the repository (bypassing the bus), reporting progress on
    /// `event_tx`. Used by batch backfills and tests; `run` is the normal path.
    pub async fn process_pending(
        &self,
        job_id: &str,
        stage: crate::models::StageKind,
        workers: usize,
        event_tx: mpsc::Sender<WorkerEvent>,
    ) -> Result<usize> {
        let pending = self.db.page_tasks().list_dispatchable(job_id, stage).await?;
        let batch_size = workers.max(1) * BATCH_FACTOR;
        let processed = Arc::new(AtomicUsize::new(0));

        for chunk in pending.chunks(batch_size) {
            for page_task in chunk {
                let _ = event_tx.send(WorkerEvent::Started { page_task_id: page_task.id.clone() }).await;

                let drawing_version_id = page_task.drawing_version_id.clone().unwrap_or_default();
                let storage_ref = relative_key(
                    self.db.storage_root(),
                    &storage::raw_pdf_path(self.db.storage_root(), &drawing_version_id),
                );
                let message = TaskMessage::new(
                    page_task.id.clone(),
                    job_id.to_string(),
                    TaskPayload::Ocr {
                        drawing_version_id,
                        page_index: page_task.page_index.unwrap_or(0),
                        storage_ref,
                    },
                );

                match self.process_one(&message).await {
                    Ok(()) => {
                        processed.fetch_add(1, Ordering::SeqCst);
                        let _ = event_tx.send(WorkerEvent::Completed { page_task_id: page_task.id.clone() }).await;
                    }
                    Err(err) => {
                        let _ = event_tx
                            .send(WorkerEvent::Failed {
                                page_task_id: page_task.id.clone(),
                                error_kind: TaskErrorKind::RasterizationError,
                                message: err.to_string(),
                            })
                            .await;
                        return Err(err);
                    }
                }
            }
        }

        Ok(processed.load(Ordering::SeqCst))
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;
    use crate::bus::LocalBus;
    use crate::models::{PageTask, StageKind};
    use crate::workers::{DeterministicNameExtractor, DeterministicRasterizer};

    async fn setup() -> (DieselDbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DieselDbContext::new(&dir.path().join("test.db"), dir.path());
        db.init_schema().await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn process_one_writes_page_result_and_publishes_success() {
        let (db, _dir) = setup().await;
        let bus = Arc::new(LocalBus::default());
        let mut names = HashMap::new();
        names.insert(("drawings/old-1/raw.pdf".to_string(), 0), "A-101".to_string());

        let worker = OcrWorker::new(
            db.clone(),
            bus.clone(),
            Settings::default(),
            Arc::new(DeterministicRasterizer),
            Arc::new(DeterministicNameExtractor::new(names)),
        );

        let task = PageTask::new_ocr("task-1".into(), "job-1".into(), StageKind::OcrOld, "old-1".into(), 0);
        db.page_tasks().create(&task).await.unwrap();

        let mut completions = bus.subscribe(CompletionMessage::TOPIC).await.unwrap();

        let message = TaskMessage::new(
            "task-1",
            "job-1",
            TaskPayload::Ocr {
                drawing_version_id: "old-1".into(),
                page_index: 0,
                storage_ref: "drawings/old-1/raw.pdf".into(),
            },
        );
        worker.process_one(&message).await.unwrap();

        let result = db.page_results().get_by_page("old-1", 0).await.unwrap().unwrap();
        assert_eq!(result.drawing_name.as_deref(), Some("A-101"));

        let delivery = completions.recv().await.unwrap();
        let completion: CompletionMessage = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(completion.status, crate::bus::messages::CompletionStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_discarded_without_a_second_completion() {
        let (db, _dir) = setup().await;
        let bus = Arc::new(LocalBus::default());
        let worker = OcrWorker::new(
            db.clone(),
            bus.clone(),
            Settings::default(),
            Arc::new(DeterministicRasterizer),
            Arc::new(DeterministicNameExtractor::new(HashMap::new())),
        );

        let task = PageTask::new_ocr("task-1".into(), "job-1".into(), StageKind::OcrOld, "old-1".into(), 0);
        db.page_tasks().create(&task).await.unwrap();

        let message = TaskMessage::new(
            "task-1",
            "job-1",
            TaskPayload::Ocr {
                drawing_version_id: "old-1".into(),
                page_index: 0,
                storage_ref: "drawings/old-1/raw.pdf".into(),
            },
        );

        let mut completions = bus.subscribe(CompletionMessage::TOPIC).await.unwrap();
        worker.process_one(&message).await.unwrap();
        worker.process_one(&message).await.unwrap();

        let delivery = completions.recv().await.unwrap();
        delivery.ack.ack().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(50), completions.recv()).await;
        assert!(second.is_err(), "second process_one must not publish a completion");
    }
}
