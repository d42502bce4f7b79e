//! Summary Worker (spec §4.5): drafts a structured change description for one DiffResult.
//!
//! Reads the `DiffResult` row named by `diff_result_id`, drafts a summary via
//! the `ChangeSummarizer` seam, then appends a `ChangeSummary` row (history
//! is append-only; the latest row by `created_at` is authoritative — see
//! `ChangeSummaryRepository`) before publishing its completion.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{ChangeSummarizer, Result, SummaryDraft};
use crate::bus::messages::{CompletionMessage, CompletionOutputs, TaskMessage, TaskPayload};
use crate::bus::{self, MessageBus};
use crate::config::Settings;
use crate::models::{ChangeItem, ChangeSummary, SummarySource, TaskErrorKind};
use crate::repository::diesel_context::DieselDbContext;
use crate::storage;

pub struct SummaryWorker<B: MessageBus> {
    db: DieselDbContext,
    bus: Arc<B>,
    settings: Settings,
    summarizer: Arc<dyn ChangeSummarizer>,
}

impl<B: MessageBus + 'static> SummaryWorker<B> {
    pub fn new(db: DieselDbContext, bus: Arc<B>, settings: Settings, summarizer: Arc<dyn ChangeSummarizer>) -> Self {
        Self { db, bus, settings, summarizer }
    }

    pub async fn run(&self) -> Result<()> {
        let mut subscription = self.bus.subscribe("tasks.summary").await?;

        while let Some(delivery) = subscription.recv().await {
            let task: TaskMessage = match serde_json::from_slice(&delivery.payload) {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!(error = %err, "failed to decode summary task message; dropping");
                    delivery.ack.ack().await?;
                    continue;
                }
            };

            match self.process_one(&task).await {
                Ok(()) => delivery.ack.ack().await?,
                Err(err) => {
                    tracing::error!(page_task_id = %task.page_task_id, error = %err, "summary worker failed; nacking for redelivery");
                    delivery.ack.nack().await?;
                }
            }
        }

        Ok(())
    }

    pub async fn process_one(&self, task: &TaskMessage) -> Result<()> {
        let TaskPayload::Summary { diff_result_id } = &task.payload else {
            tracing::warn!(page_task_id = %task.page_task_id, "summary worker received a non-summary task; discarding");
            return Ok(());
        };

        if !self.db.page_tasks().claim(&task.page_task_id).await? {
            tracing::debug!(page_task_id = %task.page_task_id, "task already claimed or terminal; discarding redelivery");
            return Ok(());
        }

        let diff_result = match self.db.diff_results().get(diff_result_id).await? {
            Some(diff_result) => diff_result,
            None => {
                return self
                    .publish_failure(task, TaskErrorKind::PreconditionMissing, "diff result not found")
                    .await;
            }
        };

        let summarizer = self.summarizer.clone();
        let drawing_name = diff_result.drawing_name.clone();
        let change_detected = diff_result.change_detected;
        let change_count = diff_result.change_count;
        let alignment_score = diff_result.alignment_score;
        let budget = Duration::from_secs(self.settings.summary_budget_secs);

        let work = tokio::task::spawn_blocking(move || {
            summarizer.summarize(&drawing_name, change_detected, change_count, alignment_score)
        });

        let draft: SummaryDraft = match tokio::time::timeout(budget, work).await {
            Ok(Ok(Ok(draft))) => draft,
            Ok(Ok(Err(kind))) => return self.publish_failure(task, kind, "summary backend refused the request").await,
            Ok(Err(join_err)) => {
                return self.publish_failure(task, TaskErrorKind::SchemaParseError, &join_err.to_string()).await;
            }
            Err(_elapsed) => {
                return self.publish_failure(task, TaskErrorKind::LlmRateLimited, "summary budget exceeded").await;
            }
        };

        let summary_file_path = storage::summary_path(self.db.storage_root(), &task.job_id, &diff_result.drawing_name);
        let changes: Vec<ChangeItem> = draft
            .changes
            .into_iter()
            .map(|change| ChangeItem {
                id: Uuid::new_v4().to_string(),
                title: change.title,
                description: change.description,
                change_type: change.change_type,
                location: change.location,
                impact: change.impact,
                trade: change.trade,
            })
            .collect();

        let summary = ChangeSummary {
            id: Uuid::new_v4().to_string(),
            diff_result_id: diff_result.id.clone(),
            overall_summary: draft.overall_summary,
            total_changes: changes.len() as i32,
            changes,
            critical_change: draft.critical_change,
            recommendations: draft.recommendations,
            free_text: draft.free_text,
            model_tag: draft.model_tag,
            source: SummarySource::Machine,
            created_at: Utc::now(),
        };

        if let Err(err) = write_file(&summary_file_path, summary.free_text.as_bytes()) {
            return self.publish_failure(task, TaskErrorKind::OverlayIoError, &err.to_string()).await;
        }
        self.db.change_summaries().create(&summary).await?;

        let completion = CompletionMessage::success(
            task.page_task_id.clone(),
            task.job_id.clone(),
            CompletionOutputs::Summary { summary_id: Some(summary.id) },
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
            CompletionOutputs::Summary { summary_id: None },
        );
        bus::publish_completion(self.bus.as_ref(), &completion).await?;
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}
