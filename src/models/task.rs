//! PageTask: the unit of durable, retryable, idempotent work carried by one bus message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error_kind::TaskErrorKind;
use super::stage::StageKind;

/// Status of a [`PageTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of per-page work, carried by one bus message.
///
/// For OCR tasks, `drawing_version_id`/`page_index` identify the page to
/// rasterize. For Diff/Summary tasks, `old_page_index`/`new_page_index`/
/// `drawing_name` identify the matched pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTask {
    pub id: String,
    pub job_id: String,
    pub stage_kind: StageKind,
    pub drawing_version_id: Option<String>,
    pub page_index: Option<i32>,
    pub old_page_index: Option<i32>,
    pub new_page_index: Option<i32>,
    pub drawing_name: Option<String>,
    pub attempt_count: i32,
    pub status: TaskStatus,
    pub error_kind: Option<TaskErrorKind>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PageTask {
    /// Build an OCR PageTask for one page of one DrawingVersion.
    pub fn new_ocr(
        id: String,
        job_id: String,
        stage_kind: StageKind,
        drawing_version_id: String,
        page_index: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            stage_kind,
            drawing_version_id: Some(drawing_version_id),
            page_index: Some(page_index),
            old_page_index: None,
            new_page_index: None,
            drawing_name: None,
            attempt_count: 0,
            status: TaskStatus::Pending,
            error_kind: None,
            error_message: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a Diff or Summary PageTask for one matched pair.
    pub fn new_pair(
        id: String,
        job_id: String,
        stage_kind: StageKind,
        drawing_name: String,
        old_page_index: i32,
        new_page_index: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            stage_kind,
            drawing_version_id: None,
            page_index: None,
            old_page_index: Some(old_page_index),
            new_page_index: Some(new_page_index),
            drawing_name: Some(drawing_name),
            attempt_count: 0,
            status: TaskStatus::Pending,
            error_kind: None,
            error_message: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a Summary PageTask for one already-matched pair's diff result.
    /// Unlike a Diff PageTask, the summary worker only needs the diff
    /// result id (carried on the task message, not on this row) and the
    /// drawing name for storage paths — page indices aren't meaningful here.
    pub fn new_summary(id: String, job_id: String, drawing_name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            stage_kind: StageKind::Summary,
            drawing_version_id: None,
            page_index: None,
            old_page_index: None,
            new_page_index: None,
            drawing_name: Some(drawing_name),
            attempt_count: 0,
            status: TaskStatus::Pending,
            error_kind: None,
            error_message: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether another attempt is permitted given the bounded attempt cap
    /// (default 3, per spec §4.1), accounting for the `llm_rate_limited`
    /// exemption (§7).
    pub fn can_retry(&self, max_attempts: i32) -> bool {
        match self.error_kind {
            Some(kind) if !kind.is_retryable() => false,
            Some(kind) if !kind.counts_against_attempt_cap() => true,
            _ => self.attempt_count < max_attempts,
        }
    }
}
