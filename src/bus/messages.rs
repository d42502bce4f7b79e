//! Wire schemas for bus messages.
//!
//! JSON, UTF-8, versioned. A task message carries `{version, message_id,
//! page_task_id, job_id, kind, payload}`; a completion message additionally
//! carries `{status, error_kind?, error_message?, outputs}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::TaskErrorKind;

/// Current wire version. Bumped only on a breaking schema change.
pub const MESSAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Ocr,
    Diff,
    Summary,
}

/// Stage-specific task payload. Tagged so a single topic can, in principle,
/// carry more than one kind (the orchestrator instead uses one topic per
/// stage, but the wire shape stays self-describing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Ocr {
        drawing_version_id: String,
        page_index: i32,
        storage_ref: String,
    },
    Diff {
        drawing_name: String,
        old_page_result_ref: String,
        new_page_result_ref: String,
    },
    Summary {
        diff_result_id: String,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            TaskPayload::Ocr { .. } => MessageKind::Ocr,
            TaskPayload::Diff { .. } => MessageKind::Diff,
            TaskPayload::Summary { .. } => MessageKind::Summary,
        }
    }
}

/// A task dispatched by the Orchestrator to exactly one worker kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub version: u32,
    pub message_id: String,
    pub page_task_id: String,
    pub job_id: String,
    #[serde(flatten)]
    pub payload: TaskPayload,
}

impl TaskMessage {
    pub fn new(page_task_id: impl Into<String>, job_id: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            version: MESSAGE_VERSION,
            message_id: Uuid::new_v4().to_string(),
            page_task_id: page_task_id.into(),
            job_id: job_id.into(),
            payload,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self.payload.kind() {
            MessageKind::Ocr => "tasks.ocr",
            MessageKind::Diff => "tasks.diff",
            MessageKind::Summary => "tasks.summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

/// Stage-specific completion outputs. Only the fields relevant to the
/// worker's stage are populated; the rest are absent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionOutputs {
    Ocr {
        drawing_name: Option<String>,
    },
    Diff {
        overlay_ref: Option<String>,
        alignment_score: Option<f64>,
        change_detected: Option<bool>,
        change_count: Option<i64>,
    },
    Summary {
        summary_id: Option<String>,
    },
}

impl CompletionOutputs {
    pub fn kind(&self) -> MessageKind {
        match self {
            CompletionOutputs::Ocr { .. } => MessageKind::Ocr,
            CompletionOutputs::Diff { .. } => MessageKind::Diff,
            CompletionOutputs::Summary { .. } => MessageKind::Summary,
        }
    }
}

/// A worker's report of the terminal outcome of exactly one PageTask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub version: u32,
    pub message_id: String,
    pub page_task_id: String,
    pub job_id: String,
    pub status: CompletionStatus,
    pub error_kind: Option<TaskErrorKind>,
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub outputs: CompletionOutputs,
}

impl CompletionMessage {
    pub const TOPIC: &'static str = "completions";

    pub fn success(page_task_id: impl Into<String>, job_id: impl Into<String>, outputs: CompletionOutputs) -> Self {
        Self {
            version: MESSAGE_VERSION,
            message_id: Uuid::new_v4().to_string(),
            page_task_id: page_task_id.into(),
            job_id: job_id.into(),
            status: CompletionStatus::Completed,
            error_kind: None,
            error_message: None,
            outputs,
        }
    }

    pub fn failure(
        page_task_id: impl Into<String>,
        job_id: impl Into<String>,
        error_kind: TaskErrorKind,
        error_message: impl Into<String>,
        outputs: CompletionOutputs,
    ) -> Self {
        Self {
            version: MESSAGE_VERSION,
            message_id: Uuid::new_v4().to_string(),
            page_task_id: page_task_id.into(),
            job_id: job_id.into(),
            status: CompletionStatus::Failed,
            error_kind: Some(error_kind),
            error_message: Some(error_message.into()),
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_message_round_trips_through_json() {
        let msg = TaskMessage::new(
            "task-1",
            "job-1",
            TaskPayload::Ocr {
                drawing_version_id: "old-1".into(),
                page_index: 0,
                storage_ref: "drawings/old-1/raw.pdf".into(),
            },
        );
        assert_eq!(msg.topic(), "tasks.ocr");

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.page_task_id, "task-1");
        matches!(decoded.payload, TaskPayload::Ocr { .. });
    }

    #[test]
    fn completion_message_carries_error_kind_on_failure() {
        let msg = CompletionMessage::failure(
            "task-2",
            "job-1",
            TaskErrorKind::AlignmentFailed,
            "too few features",
            CompletionOutputs::Diff {
                overlay_ref: None,
                alignment_score: None,
                change_detected: None,
                change_count: None,
            },
        );
        assert_eq!(msg.status, CompletionStatus::Failed);
        assert_eq!(msg.error_kind, Some(TaskErrorKind::AlignmentFailed));
    }
}
